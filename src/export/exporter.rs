use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::future::BoxFuture;
use log::{debug, info, warn};

use super::dependency::{DependencyResolver, Trail};
use super::environment::{ConnectorEnv, ModelUnits};
use super::flow::ExportFlow;
use super::staleness::{UPDATED_AT, is_stale, parse_backend_date};
use super::translation;
use super::ExportOutcome;
use crate::backend::BackendError;
use crate::binding::{Binding, BindingId};
use crate::error::SyncError;
use crate::mapper::FieldSet;

/// Exports the bindings of one model.
pub struct Exporter {
	env: Arc<ConnectorEnv>,
	units: Arc<ModelUnits>,
	flow: Arc<dyn ExportFlow>,
	trail: Trail,
}

impl Exporter {
	pub fn new(env: Arc<ConnectorEnv>, binding_model: &str) -> Result<Self, SyncError> {
		let units = env.units(binding_model)?;
		let flow = Arc::clone(&units.flow);
		Ok(Self {
			env,
			units,
			flow,
			trail: Trail::default(),
		})
	}

	/// Replace the flow registered for the model.
	pub fn with_flow(mut self, flow: Arc<dyn ExportFlow>) -> Self {
		self.flow = flow;
		self
	}

	pub(crate) fn with_trail(mut self, trail: Trail) -> Self {
		self.trail = trail;
		self
	}

	/// Export one binding. `fields` restricts an update to those local fields; it is
	/// ignored when the binding has no remote id yet.
	///
	/// The returned future is boxed because dependency exports run nested exporters.
	pub fn run(
		&self,
		binding_id: BindingId,
		fields: Option<FieldSet>,
	) -> BoxFuture<'_, Result<ExportOutcome, SyncError>> {
		Box::pin(async move {
			let started = Instant::now();
			let result = self.export(binding_id, fields).await;
			self.env
				.metrics
				.export_duration_seconds
				.observe(started.elapsed().as_secs_f64());
			self.env.metrics.export_outcome(match &result {
				Ok(ExportOutcome::Created(_)) => "created",
				Ok(ExportOutcome::Updated(_)) => "updated",
				Ok(ExportOutcome::NoOp) => "noop",
				Ok(ExportOutcome::Skipped) => "skipped",
				Err(e) if e.is_retryable() => "retry",
				Err(_) => "failed",
			});
			result
		})
	}

	async fn export(
		&self,
		binding_id: BindingId,
		fields: Option<FieldSet>,
	) -> Result<ExportOutcome, SyncError> {
		let model = self.units.binding_model.as_str();
		let trail = self
			.trail
			.enter(model, binding_id, self.env.max_dependency_depth)?;
		let ctx = self
			.env
			.ctx
			.with_locale(self.env.backend.default_lang.clone());

		// Nothing is held open across the staleness read and the dependency exports.
		let mut session = self.env.store.begin().await?;
		let binding = session
			.binding(model, binding_id)
			.await?
			.ok_or_else(|| SyncError::MissingBinding {
				model: model.to_string(),
				id: binding_id,
			})?;
		let record = session
			.read_record(&self.units.record_model, binding.record_id, &ctx)
			.await?;
		session.rollback().await?;

		let mut remote_id = binding.remote_id.clone();
		match self.should_import(&binding).await {
			Ok(true) => self.delay_import(&binding).await?,
			Ok(false) => {}
			Err(BackendError::IdMissing(rid)) => {
				warn!(
					"{} #{}: remote record {} no longer exists, it will be created again",
					model, binding_id, rid
				);
				remote_id = None;
			}
			Err(e) => return Err(e.into()),
		}

		if self.flow.has_to_skip(&binding, &record) {
			debug!("{} #{}: export skipped", model, binding_id);
			return Ok(ExportOutcome::Skipped);
		}

		let resolver = DependencyResolver::new(Arc::clone(&self.env), trail);
		self.flow.export_dependencies(&resolver, &record).await?;

		let mut session = self.env.store.begin().await?;
		if !session.try_lock(model, binding_id).await? {
			session.rollback().await?;
			self.env.metrics.export_lock_contention_total.inc();
			info!(
				"{} #{} is locked by another job, export deferred",
				model, binding_id
			);
			return Err(SyncError::Retryable(format!(
				"A concurrent job is already exporting the same record ({} with id {}). \
				 The job will be retried later.",
				model, binding_id
			)));
		}

		// Another job may have exported the binding since the first read.
		let locked = session
			.binding(model, binding_id)
			.await?
			.ok_or_else(|| SyncError::MissingBinding {
				model: model.to_string(),
				id: binding_id,
			})?;
		if locked.remote_id != binding.remote_id {
			debug!(
				"{} #{}: exported concurrently as {:?}",
				model, binding_id, locked.remote_id
			);
			remote_id = locked.remote_id.clone();
		}
		let fields = if remote_id.is_some() { fields } else { None };

		// Dependencies may have changed the record while it was unlocked.
		let record = session
			.read_record(&self.units.record_model, locked.record_id, &ctx)
			.await?;
		let mapped = self.units.mapper.map_record(&record)?;

		let outcome = match remote_id.as_deref() {
			Some(rid) => {
				let data = mapped.values(false, fields.as_ref());
				if data.is_empty() {
					ExportOutcome::NoOp
				} else {
					self.flow.validate(&data, false)?;
					self.units.adapter.write(rid, &data, None).await?;
					ExportOutcome::Updated(rid.to_string())
				}
			}
			None => {
				let data = mapped.values(true, None);
				if data.is_empty() {
					ExportOutcome::NoOp
				} else {
					self.flow.validate(&data, true)?;
					ExportOutcome::Created(self.units.adapter.create(&data).await?)
				}
			}
		};

		if let Some(rid) = outcome.remote_id().or(remote_id.as_deref()) {
			session.bind(model, binding_id, rid, Utc::now()).await?;
		}
		session.commit().await?;
		info!("{} #{}: {}", model, binding_id, outcome);

		if self.flow.propagates_translations() {
			if let Some(rid) = outcome.remote_id() {
				let report = translation::propagate(
					&self.env,
					&self.units,
					self.flow.as_ref(),
					&locked,
					rid,
					fields.as_ref(),
				)
				.await?;
				if !report.failures.is_empty() {
					return Err(SyncError::Translation {
						exported: outcome,
						failures: report.failures,
					});
				}
			}
		}
		Ok(outcome)
	}

	/// Whether the remote copy changed since the last synchronization. A bound record
	/// without synchronization date is always refreshed.
	async fn should_import(&self, binding: &Binding) -> Result<bool, BackendError> {
		let Some(remote_id) = binding.remote_id.as_deref() else {
			return Ok(false);
		};
		let Some(sync_date) = binding.sync_date else {
			return Ok(true);
		};
		let remote = self.units.adapter.read(remote_id, &[UPDATED_AT]).await?;
		let updated = remote.get(UPDATED_AT).and_then(parse_backend_date);
		Ok(is_stale(sync_date, updated))
	}

	async fn delay_import(&self, binding: &Binding) -> Result<(), SyncError> {
		let Some(remote_id) = binding.remote_id.as_deref() else {
			return Ok(());
		};
		if let Some(job) = self.flow.import_job(binding, remote_id) {
			info!(
				"{} #{} changed on the backend since {:?}, scheduling {}",
				binding.model, binding.id, binding.sync_date, job
			);
			self.env.queue.enqueue(job).await?;
			self.env.metrics.imports_scheduled_total.inc();
		}
		Ok(())
	}
}
