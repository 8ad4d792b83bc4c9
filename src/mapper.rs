use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::binding::{Payload, Record};
use crate::error::SyncError;

/// Subset of local field names an export is restricted to.
pub type FieldSet = BTreeSet<String>;

/// Transforms a local record into remote payloads.
pub trait RecordMapper: Send + Sync {
	fn map_record(&self, record: &Record) -> Result<MappedRecord, SyncError>;

	/// Whether a local field carries per-language values.
	fn is_translatable(&self, field: &str) -> bool;

	/// All translatable local fields known to this mapper.
	fn translatable_fields(&self) -> FieldSet;
}

/// One mapped value together with the local field it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedValue {
	pub source: String,
	pub target: String,
	pub value: Value,
	pub create_only: bool,
}

/// Output of a mapping, from which the create and update payloads are drawn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRecord {
	values: Vec<MappedValue>,
}

impl MappedRecord {
	pub fn new(values: Vec<MappedValue>) -> Self {
		Self { values }
	}

	/// Payload for a create (`for_create`) or an update, restricted to the mapped
	/// values whose source field is in `fields` when given.
	pub fn values(&self, for_create: bool, fields: Option<&FieldSet>) -> Payload {
		self.values
			.iter()
			.filter(|v| for_create || !v.create_only)
			.filter(|v| fields.is_none_or(|f| f.contains(&v.source)))
			.map(|v| (v.target.clone(), v.value.clone()))
			.collect()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}
}

/// Declarative rule copying one local field to one remote attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
	pub source: String,
	pub target: String,
	#[serde(default)]
	pub translatable: bool,
	/// Sent on create only, never on update.
	#[serde(default)]
	pub create_only: bool,
	/// Fail the mapping when the local value is missing or null.
	#[serde(default)]
	pub required: bool,
}

impl FieldRule {
	pub fn direct(source: impl Into<String>, target: impl Into<String>) -> Self {
		Self {
			source: source.into(),
			target: target.into(),
			translatable: false,
			create_only: false,
			required: false,
		}
	}

	pub fn translatable(mut self) -> Self {
		self.translatable = true;
		self
	}

	pub fn create_only(mut self) -> Self {
		self.create_only = true;
		self
	}

	pub fn required(mut self) -> Self {
		self.required = true;
		self
	}

	/// Rule copying the remote attribute back into the local field.
	pub fn inverted(&self) -> Self {
		FieldRule::direct(self.target.clone(), self.source.clone())
	}
}

/// Mapper built from a list of [`FieldRule`]s. Fields absent from the local record
/// are left out of the payload.
#[derive(Debug, Clone, Default)]
pub struct FieldMapper {
	rules: Vec<FieldRule>,
}

impl FieldMapper {
	pub fn new(rules: Vec<FieldRule>) -> Self {
		Self { rules }
	}

	/// Mapper for the way back, from remote attributes to local fields.
	pub fn inverted(&self) -> Self {
		Self::new(self.rules.iter().map(FieldRule::inverted).collect())
	}
}

impl RecordMapper for FieldMapper {
	fn map_record(&self, record: &Record) -> Result<MappedRecord, SyncError> {
		let mut values = Vec::with_capacity(self.rules.len());
		for rule in &self.rules {
			match record.get(&rule.source) {
				Some(v) if !(rule.required && v.is_null()) => values.push(MappedValue {
					source: rule.source.clone(),
					target: rule.target.clone(),
					value: v.clone(),
					create_only: rule.create_only,
				}),
				_ if rule.required => {
					return Err(SyncError::Mapping(format!(
						"required field '{}' has no value",
						rule.source
					)));
				}
				_ => {}
			}
		}
		Ok(MappedRecord::new(values))
	}

	fn is_translatable(&self, field: &str) -> bool {
		self.rules
			.iter()
			.any(|r| r.translatable && r.source == field)
	}

	fn translatable_fields(&self) -> FieldSet {
		self.rules
			.iter()
			.filter(|r| r.translatable)
			.map(|r| r.source.clone())
			.collect()
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use serde_json::json;

	fn mapper() -> FieldMapper {
		FieldMapper::new(vec![
			FieldRule::direct("name", "name").translatable(),
			FieldRule::direct("default_code", "sku").create_only(),
			FieldRule::direct("list_price", "price"),
		])
	}

	fn record() -> Record {
		json!({"name": "Chair", "default_code": "CH-1", "list_price": 12.5})
			.as_object()
			.unwrap()
			.clone()
	}

	#[test]
	fn create_view_includes_create_only_fields() {
		let mapped = mapper().map_record(&record()).unwrap();
		let create = mapped.values(true, None);
		let update = mapped.values(false, None);

		assert_eq!(create.len(), 3);
		assert_eq!(create["sku"], "CH-1");
		assert!(!update.contains_key("sku"));
	}

	#[test]
	fn field_subset_filters_on_source_names() {
		let mapped = mapper().map_record(&record()).unwrap();
		let fields: FieldSet = ["list_price".to_string()].into_iter().collect();

		let update = mapped.values(false, Some(&fields));
		assert_eq!(update.len(), 1);
		assert_eq!(update["price"], 12.5);

		let none: FieldSet = ["description".to_string()].into_iter().collect();
		assert!(mapped.values(false, Some(&none)).is_empty());
	}

	#[test]
	fn required_field_without_value_is_a_mapping_error() {
		let m = FieldMapper::new(vec![FieldRule::direct("categ_id", "category_id").required()]);
		let err = m.map_record(&Record::new()).unwrap_err();
		assert!(matches!(err, SyncError::Mapping(_)));
	}

	#[test]
	fn inverted_mapper_reads_remote_attributes() {
		let back = mapper().inverted();
		let remote = json!({"sku": "CH-1", "price": 14.0, "updated_at": "2024-01-01 00:00:00"})
			.as_object()
			.unwrap()
			.clone();
		let local = back.map_record(&remote).unwrap().values(true, None);
		assert_eq!(local["default_code"], "CH-1");
		assert_eq!(local["list_price"], 14.0);
		assert!(!local.contains_key("updated_at"));
	}

	#[test]
	fn translatable_capability() {
		let m = mapper();
		assert!(m.is_translatable("name"));
		assert!(!m.is_translatable("list_price"));
		assert_eq!(m.translatable_fields().len(), 1);
	}
}
