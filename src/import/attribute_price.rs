use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{ImportOutcome, Importer, store_import};
use crate::binding::Record;
use crate::error::SyncError;
use crate::export::ConnectorEnv;

pub const PRICE_BINDING_MODEL: &str = "magento.product.attribute.price";
pub const PRICE_RECORD_MODEL: &str = "product.attribute.price";
pub const PRODUCT_BINDING_MODEL: &str = "magento.product.product";
pub const VALUE_BINDING_MODEL: &str = "magento.product.attribute.value";

/// Whether a remote product record is a configurable (parent) product.
pub fn is_configurable(record: &Record) -> bool {
	record.get("type_id").and_then(Value::as_str) == Some("configurable")
}

/// Imports the extra price of a configurable attribute value.
///
/// The job data carries the batch filters:
///
/// ```json
/// {"product_id": "123", "value_binding_id": 7, "product": {"type_id": "configurable"},
///  "price": {"value_index": "45", "pricing_value": "10", "is_percent": "1"}}
/// ```
///
/// The price is stored under `external_id = value_index + "_" + product_id`, which
/// replaces the remote id given to the job.
#[derive(Debug, Clone)]
pub struct AttributePriceImporter {
	pub binding_model: String,
	pub record_model: String,
	pub product_binding_model: String,
	pub value_binding_model: String,
}

impl Default for AttributePriceImporter {
	fn default() -> Self {
		Self {
			binding_model: PRICE_BINDING_MODEL.to_string(),
			record_model: PRICE_RECORD_MODEL.to_string(),
			product_binding_model: PRODUCT_BINDING_MODEL.to_string(),
			value_binding_model: VALUE_BINDING_MODEL.to_string(),
		}
	}
}

/// Price record built from the batch filters.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
	pub external_id: String,
	pub product_id: String,
	pub pricing_value: f64,
	pub is_percent: bool,
	pub value_binding_id: Option<i64>,
}

fn text(value: &Value) -> Option<String> {
	match value {
		Value::String(s) if !s.is_empty() => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

fn number(value: &Value) -> Option<f64> {
	match value {
		Value::Number(n) => n.as_f64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

impl PriceRecord {
	pub fn from_filters(filters: &Value) -> Result<Self, SyncError> {
		let invalid = |what: &str| SyncError::InvalidData(format!("price filters: {}", what));

		if let Some(Value::Object(product)) = filters.get("product") {
			if !is_configurable(product) {
				return Err(invalid("parent product is not configurable"));
			}
		}

		let product_id = filters
			.get("product_id")
			.and_then(text)
			.ok_or_else(|| invalid("missing product_id"))?;
		let price = filters
			.get("price")
			.and_then(Value::as_object)
			.ok_or_else(|| invalid("missing price"))?;
		let value_index = price
			.get("value_index")
			.and_then(text)
			.ok_or_else(|| invalid("missing price.value_index"))?;
		let pricing_value = price
			.get("pricing_value")
			.and_then(number)
			.ok_or_else(|| invalid("missing or non numeric price.pricing_value"))?;
		let is_percent = price.get("is_percent").and_then(text).as_deref() == Some("1");
		let value_binding_id = filters.get("value_binding_id").and_then(Value::as_i64);

		Ok(Self {
			external_id: format!("{}_{}", value_index, product_id),
			product_id,
			pricing_value,
			is_percent,
			value_binding_id,
		})
	}

	/// Extra price in currency units; percentages apply to `list_price`.
	pub fn price_extra(&self, list_price: f64) -> f64 {
		if self.is_percent {
			self.pricing_value / 100.0 * list_price
		} else {
			self.pricing_value
		}
	}
}

#[async_trait]
impl Importer for AttributePriceImporter {
	async fn run(
		&self,
		env: &ConnectorEnv,
		_remote_id: &str,
		data: Option<&Value>,
		_force: bool,
	) -> Result<ImportOutcome, SyncError> {
		let filters =
			data.ok_or_else(|| SyncError::InvalidData("price import needs batch filters".into()))?;
		let price = PriceRecord::from_filters(filters)?;
		let ctx = env.ctx.with_locale(env.backend.default_lang.clone());

		let mut session = env.store.begin().await?;
		let product = session
			.binding_by_remote(&self.product_binding_model, env.backend.id, &price.product_id)
			.await?;
		let Some(product) = product else {
			session.rollback().await?;
			return Err(SyncError::Mapping(format!(
				"The product with remote id {} is not imported.",
				price.product_id
			)));
		};
		let product_units = env.units(&self.product_binding_model)?;
		let product_record = session
			.read_record(&product_units.record_model, product.record_id, &ctx)
			.await?;

		let value = match price.value_binding_id {
			Some(id) => Some(
				session
					.binding(&self.value_binding_model, id)
					.await?
					.ok_or_else(|| SyncError::MissingBinding {
						model: self.value_binding_model.clone(),
						id,
					})?,
			),
			None => None,
		};
		session.rollback().await?;

		let list_price = product_record
			.get("list_price")
			.and_then(number)
			.unwrap_or(0.0);
		let template_id = product_record
			.get("product_tmpl_id")
			.cloned()
			.unwrap_or(Value::Null);

		let mut values: Map<String, Value> = Map::new();
		values.insert("price_extra".into(), json!(price.price_extra(list_price)));
		values.insert("external_id".into(), json!(price.external_id));
		values.insert("backend_id".into(), json!(env.backend.id));
		values.insert("product_tmpl_id".into(), template_id);
		if let Some(value) = value {
			values.insert("value_id".into(), json!(value.record_id));
			values.insert("magento_value_id".into(), json!(value.id));
		}

		store_import(
			env,
			&self.binding_model,
			&self.record_model,
			&price.external_id,
			values,
		)
		.await
	}
}
