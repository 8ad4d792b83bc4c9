use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dependency::DependencyResolver;
use crate::binding::{Binding, Payload, Record, Relation};
use crate::error::SyncError;
use crate::queue::Job;

/// Per-model hooks of an export. Every hook has a neutral default.
#[async_trait]
pub trait ExportFlow: Send + Sync {
	/// Return `true` to stop the export before anything is locked or sent.
	fn has_to_skip(&self, _binding: &Binding, _record: &Record) -> bool {
		false
	}

	/// Make sure every record this one refers to exists on the backend. Runs before
	/// the binding is locked.
	async fn export_dependencies(
		&self,
		_deps: &DependencyResolver,
		_record: &Record,
	) -> Result<(), SyncError> {
		Ok(())
	}

	/// Check the mapped payload before it is sent. Failures must be
	/// [`SyncError::InvalidData`].
	fn validate(&self, _payload: &Payload, _for_create: bool) -> Result<(), SyncError> {
		Ok(())
	}

	/// Push translatable fields to the other-language storeviews after the export.
	fn propagates_translations(&self) -> bool {
		false
	}

	/// Job that refreshes the local record when the remote copy changed since the
	/// last synchronization. `None` disables the refresh for this model.
	fn import_job(&self, binding: &Binding, remote_id: &str) -> Option<Job> {
		Some(Job::Import {
			model: binding.model.clone(),
			backend_id: binding.backend_id,
			remote_id: remote_id.to_string(),
			force: true,
			data: None,
		})
	}
}

/// Flow that keeps every default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFlow;

impl ExportFlow for DefaultFlow {}

/// A many2one field whose target must be exported first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRule {
	/// Local field holding the related record id.
	pub field: String,
	/// Local model of the related record.
	pub record_model: String,
	/// Binding model used to export it.
	pub binding_model: String,
}

impl DependencyRule {
	pub fn new(
		field: impl Into<String>,
		record_model: impl Into<String>,
		binding_model: impl Into<String>,
	) -> Self {
		Self {
			field: field.into(),
			record_model: record_model.into(),
			binding_model: binding_model.into(),
		}
	}
}

/// Declarative flow: dependencies from many2one fields, remote attributes required on
/// create, and an optional translation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardFlow {
	#[serde(default)]
	pub dependencies: Vec<DependencyRule>,
	/// Remote attribute names a create payload must carry.
	#[serde(default)]
	pub required_on_create: Vec<String>,
	#[serde(default)]
	pub translate: bool,
}

impl StandardFlow {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn depends_on(mut self, rule: DependencyRule) -> Self {
		self.dependencies.push(rule);
		self
	}

	pub fn require_on_create(mut self, attribute: impl Into<String>) -> Self {
		self.required_on_create.push(attribute.into());
		self
	}

	pub fn with_translations(mut self) -> Self {
		self.translate = true;
		self
	}
}

/// Id held by a relational field: a bare integer or an `[id, display name]` pair.
/// Empty relations (`null`, `false`, `0`) yield `None`.
pub fn relation_id(value: &Value) -> Result<Option<i64>, SyncError> {
	let id = match value {
		Value::Null | Value::Bool(false) => return Ok(None),
		Value::Number(n) => n.as_i64(),
		Value::Array(pair) => pair.first().and_then(Value::as_i64),
		_ => None,
	};
	match id {
		Some(0) => Ok(None),
		Some(id) => Ok(Some(id)),
		None => Err(SyncError::Mapping(format!(
			"not a relational value: {}",
			value
		))),
	}
}

#[async_trait]
impl ExportFlow for StandardFlow {
	async fn export_dependencies(
		&self,
		deps: &DependencyResolver,
		record: &Record,
	) -> Result<(), SyncError> {
		for rule in &self.dependencies {
			let Some(value) = record.get(&rule.field) else {
				continue;
			};
			let Some(id) = relation_id(value)? else {
				continue;
			};
			deps.export_dependency(
				&Relation::new(rule.record_model.as_str(), id),
				&rule.binding_model,
				None,
				None,
			)
			.await?;
		}
		Ok(())
	}

	fn validate(&self, payload: &Payload, for_create: bool) -> Result<(), SyncError> {
		if !for_create {
			return Ok(());
		}
		let missing: Vec<&str> = self
			.required_on_create
			.iter()
			.filter(|attr| payload.get(attr.as_str()).is_none_or(Value::is_null))
			.map(String::as_str)
			.collect();
		if missing.is_empty() {
			Ok(())
		} else {
			Err(SyncError::InvalidData(format!(
				"missing required attribute(s): {}",
				missing.join(", ")
			)))
		}
	}

	fn propagates_translations(&self) -> bool {
		self.translate
	}
}
