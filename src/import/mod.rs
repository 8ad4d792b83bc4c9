//! Import of remote records into the local store.
//!
//! Imports are what the export engine schedules when a remote record changed since
//! its last synchronization. They write under a context with export hooks
//! suppressed and bind the local record to its remote id.

pub mod attribute_price;
pub mod batch;
pub mod record;

pub use attribute_price::{AttributePriceImporter, is_configurable};
pub use batch::{BatchReport, FromDateImport};
pub use record::RecordImporter;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::binding::{BindingId, NewBinding, Record};
use crate::error::SyncError;
use crate::export::{ConnectorEnv, retry_unique_violation};

/// Result of one import run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
	Imported { binding_id: BindingId, record_id: i64 },
	/// The local copy is at least as recent as the remote one.
	UpToDate,
}

impl fmt::Display for ImportOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ImportOutcome::Imported {
				binding_id,
				record_id,
			} => write!(f, "Record imported as #{} (binding #{}).", record_id, binding_id),
			ImportOutcome::UpToDate => f.write_str("Already up to date."),
		}
	}
}

#[async_trait]
pub trait Importer: Send + Sync {
	/// Import `remote_id`. `data` carries the remote record when the caller already
	/// has it; `force` bypasses the up-to-date check.
	async fn run(
		&self,
		env: &ConnectorEnv,
		remote_id: &str,
		data: Option<&Value>,
		force: bool,
	) -> Result<ImportOutcome, SyncError>;
}

/// Importers by binding model.
#[derive(Default)]
pub struct ImporterRegistry {
	importers: HashMap<String, Arc<dyn Importer>>,
}

impl ImporterRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, binding_model: impl Into<String>, importer: Arc<dyn Importer>) {
		self.importers.insert(binding_model.into(), importer);
	}

	pub fn get(&self, binding_model: &str) -> Result<Arc<dyn Importer>, SyncError> {
		self.importers
			.get(binding_model)
			.cloned()
			.ok_or_else(|| SyncError::UnknownModel(binding_model.to_string()))
	}
}

/// Create or update the local record bound to `remote_id` with `values`, then bind it,
/// all in one session.
pub(crate) async fn store_import(
	env: &ConnectorEnv,
	binding_model: &str,
	record_model: &str,
	remote_id: &str,
	values: Record,
) -> Result<ImportOutcome, SyncError> {
	let backend_id = env.backend.id;
	let ctx = env.ctx.without_export();
	let mut session = env.store.begin().await?;
	let existing = session
		.binding_by_remote(binding_model, backend_id, remote_id)
		.await?;

	let outcome = retry_unique_violation(async move {
		let (binding_id, record_id) = match existing {
			Some(binding) => {
				let record_id = session
					.write_record(record_model, Some(binding.record_id), &values, &ctx)
					.await?;
				(binding.id, record_id)
			}
			None => {
				let record_id = session
					.write_record(record_model, None, &values, &ctx)
					.await?;
				let binding_id = session
					.create_binding(binding_model, &NewBinding::new(record_id, backend_id), &ctx)
					.await?;
				(binding_id, record_id)
			}
		};
		session
			.bind(binding_model, binding_id, remote_id, Utc::now())
			.await?;
		session.commit().await?;
		Ok(ImportOutcome::Imported {
			binding_id,
			record_id,
		})
	})
	.await?;

	env.metrics.import_records_total.inc();
	Ok(outcome)
}
