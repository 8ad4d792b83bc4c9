use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use super::{ImportOutcome, Importer, store_import};
use crate::backend::BackendAdapter;
use crate::binding::Record;
use crate::error::SyncError;
use crate::export::ConnectorEnv;
use crate::export::staleness::{UPDATED_AT, is_stale, parse_backend_date};
use crate::mapper::RecordMapper;

/// Imports one remote record through a mapper whose rules go from remote attributes
/// to local fields.
pub struct RecordImporter {
	binding_model: String,
	record_model: String,
	adapter: Arc<dyn BackendAdapter>,
	mapper: Arc<dyn RecordMapper>,
}

impl RecordImporter {
	pub fn new(
		binding_model: impl Into<String>,
		record_model: impl Into<String>,
		adapter: Arc<dyn BackendAdapter>,
		mapper: Arc<dyn RecordMapper>,
	) -> Self {
		Self {
			binding_model: binding_model.into(),
			record_model: record_model.into(),
			adapter,
			mapper,
		}
	}

	async fn is_uptodate(
		&self,
		env: &ConnectorEnv,
		remote_id: &str,
		remote: &Record,
	) -> Result<bool, SyncError> {
		let mut session = env.store.begin().await?;
		let binding = session
			.binding_by_remote(&self.binding_model, env.backend.id, remote_id)
			.await?;
		session.rollback().await?;

		let Some(sync_date) = binding.and_then(|b| b.sync_date) else {
			return Ok(false);
		};
		let Some(updated) = remote.get(UPDATED_AT).and_then(parse_backend_date) else {
			return Ok(false);
		};
		Ok(!is_stale(sync_date, Some(updated)))
	}
}

#[async_trait]
impl Importer for RecordImporter {
	async fn run(
		&self,
		env: &ConnectorEnv,
		remote_id: &str,
		data: Option<&Value>,
		force: bool,
	) -> Result<ImportOutcome, SyncError> {
		let remote = match data {
			Some(Value::Object(map)) => map.clone(),
			Some(other) => {
				return Err(SyncError::InvalidData(format!(
					"remote record {} is not an object: {}",
					remote_id, other
				)));
			}
			None => self.adapter.read(remote_id, &[]).await?,
		};

		if !force && self.is_uptodate(env, remote_id, &remote).await? {
			debug!("{} {}: already up to date", self.binding_model, remote_id);
			return Ok(ImportOutcome::UpToDate);
		}

		let values = self.mapper.map_record(&remote)?.values(true, None);
		store_import(env, &self.binding_model, &self.record_model, remote_id, values).await
	}
}
