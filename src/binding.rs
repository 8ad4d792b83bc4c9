use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a binding row.
pub type BindingId = i64;

/// Local record values keyed by field name.
pub type Record = Map<String, Value>;

/// Remote payload keyed by backend attribute name.
pub type Payload = Map<String, Value>;

/// Correspondence between a local record and its counterpart on a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
	pub id: BindingId,
	/// Binding model name (e.g. `magento.product.product`).
	pub model: String,
	/// Id of the wrapped local record.
	pub record_id: i64,
	pub backend_id: i64,
	/// Remote id, unset until the first successful export or import.
	pub remote_id: Option<String>,
	/// Last time local and remote state were reconciled.
	pub sync_date: Option<DateTime<Utc>>,
}

/// Values for a binding row that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBinding {
	pub record_id: i64,
	pub backend_id: i64,
	/// Extra values stored with the binding.
	pub extra: Map<String, Value>,
}

impl NewBinding {
	pub fn new(record_id: i64, backend_id: i64) -> Self {
		Self {
			record_id,
			backend_id,
			extra: Map::new(),
		}
	}

	pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
		self.extra.extend(extra);
		self
	}
}

/// A remote backend and its default language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
	pub id: i64,
	pub name: String,
	pub default_lang: Option<String>,
}

/// A storeview (locale view) configured on a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storeview {
	pub id: i64,
	pub backend_id: i64,
	pub name: String,
	pub lang: Option<String>,
	pub remote_id: Option<String>,
}

/// Reference to a related local record, as held in a many2one style field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relation {
	pub model: String,
	pub id: i64,
}

impl Relation {
	pub fn new(model: impl Into<String>, id: i64) -> Self {
		Self {
			model: model.into(),
			id,
		}
	}
}
