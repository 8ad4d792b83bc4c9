use log::{debug, warn};

use super::environment::{ConnectorEnv, ModelUnits};
use super::flow::ExportFlow;
use crate::binding::{Binding, Storeview};
use crate::error::{StoreviewFailure, SyncError};
use crate::mapper::FieldSet;

/// What a translation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationReport {
	/// Storeviews that received a write.
	pub written: usize,
	pub failures: Vec<StoreviewFailure>,
}

/// Push the translatable fields of `binding` to every storeview whose language differs
/// from the backend default. Each storeview is attempted regardless of failures on the
/// others; failures are collected in the report.
pub(crate) async fn propagate(
	env: &ConnectorEnv,
	units: &ModelUnits,
	flow: &dyn ExportFlow,
	binding: &Binding,
	remote_id: &str,
	fields: Option<&FieldSet>,
) -> Result<TranslationReport, SyncError> {
	let mut report = TranslationReport::default();

	let translatable: FieldSet = units
		.mapper
		.translatable_fields()
		.into_iter()
		.filter(|f| fields.is_none_or(|set| set.contains(f)))
		.collect();
	if translatable.is_empty() {
		return Ok(report);
	}

	let default_lang = env.backend.default_lang.as_deref();
	let mut session = env.store.begin().await?;
	let storeviews: Vec<Storeview> = session
		.storeviews(env.backend.id)
		.await?
		.into_iter()
		.filter(|sv| sv.lang.is_some() && sv.lang.as_deref() != default_lang)
		.collect();
	session.rollback().await?;

	for storeview in &storeviews {
		match push_storeview(env, units, flow, binding, remote_id, &translatable, storeview).await {
			Ok(true) => report.written += 1,
			Ok(false) => {}
			Err(e) => {
				warn!(
					"{} #{}: translation for storeview {} failed: {}",
					binding.model, binding.id, storeview.name, e
				);
				env.metrics.translation_failures_total.inc();
				report.failures.push(StoreviewFailure {
					storeview: storeview.name.clone(),
					error: e.to_string(),
				});
			}
		}
	}
	Ok(report)
}

/// Write one storeview. Reads happen in a fresh session per storeview so a failed
/// read cannot poison the next one.
async fn push_storeview(
	env: &ConnectorEnv,
	units: &ModelUnits,
	flow: &dyn ExportFlow,
	binding: &Binding,
	remote_id: &str,
	translatable: &FieldSet,
	storeview: &Storeview,
) -> Result<bool, SyncError> {
	let code = storeview.remote_id.as_deref().ok_or_else(|| {
		SyncError::Mapping(format!("storeview {} is not bound to the backend", storeview.name))
	})?;
	let ctx = env.ctx.with_locale(storeview.lang.clone());

	let mut session = env.store.begin().await?;
	let record = session
		.read_record(&units.record_model, binding.record_id, &ctx)
		.await;
	session.rollback().await?;

	let mapped = units.mapper.map_record(&record?)?;
	let data = mapped.values(false, Some(translatable));
	if data.is_empty() {
		return Ok(false);
	}
	flow.validate(&data, false)?;
	units.adapter.write(remote_id, &data, Some(code)).await?;
	env.metrics.translation_writes_total.inc();
	debug!(
		"{} #{}: translated values written to storeview {}",
		binding.model, binding.id, storeview.name
	);
	Ok(true)
}
