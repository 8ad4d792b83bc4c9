use chrono::{DateTime, Duration, Utc};
use log::info;

use crate::backend::SearchFilter;
use crate::error::SyncError;
use crate::export::ConnectorEnv;
use crate::queue::Job;

pub const TEMPLATE_BINDING_MODEL: &str = "magento.product.template";
/// Per-backend start date of the configurable product import.
pub const CONFIGURABLES_FROM_DATE: &str = "import_configurables_from_date";

/// Overlap between two runs, for remote records saved while a search was running.
const IMPORT_DELTA_BUFFER: Duration = Duration::seconds(30);

/// Schedules the import of every remote record of one model changed since the last
/// run, then moves the backend's start date forward.
#[derive(Debug, Clone)]
pub struct FromDateImport {
	pub binding_model: String,
	/// Key of the stored start date.
	pub date_field: String,
	pub type_id: Option<String>,
}

/// What one batch run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
	pub scheduled: usize,
	pub from_date: Option<DateTime<Utc>>,
	pub next_from_date: DateTime<Utc>,
}

impl FromDateImport {
	/// Configurable (parent) product templates.
	pub fn configurables() -> Self {
		Self {
			binding_model: TEMPLATE_BINDING_MODEL.to_string(),
			date_field: CONFIGURABLES_FROM_DATE.to_string(),
			type_id: Some("configurable".to_string()),
		}
	}

	/// Run the batch. `initial_from` applies while the backend has no stored date.
	pub async fn run(
		&self,
		env: &ConnectorEnv,
		initial_from: Option<DateTime<Utc>>,
	) -> Result<BatchReport, SyncError> {
		let units = env.units(&self.binding_model)?;
		let backend_id = env.backend.id;
		let started = Utc::now();

		let mut session = env.store.begin().await?;
		let stored = session
			.import_from_date(backend_id, &self.date_field)
			.await?;
		session.rollback().await?;
		let from_date = stored.or(initial_from);

		let filter = SearchFilter {
			updated_from: from_date,
			updated_to: Some(started),
			type_id: self.type_id.clone(),
		};
		let remote_ids = units.adapter.search(&filter).await?;
		for remote_id in &remote_ids {
			env.queue
				.enqueue(Job::Import {
					model: self.binding_model.clone(),
					backend_id,
					remote_id: remote_id.clone(),
					force: false,
					data: None,
				})
				.await?;
			env.metrics.batch_imports_scheduled_total.inc();
		}

		let next_from_date = started - IMPORT_DELTA_BUFFER;
		let mut session = env.store.begin().await?;
		session
			.set_import_from_date(backend_id, &self.date_field, next_from_date)
			.await?;
		session.commit().await?;

		info!(
			"{}: {} import(s) scheduled since {:?}, next run from {}",
			self.binding_model,
			remote_ids.len(),
			from_date,
			next_from_date
		);
		Ok(BatchReport {
			scheduled: remote_ids.len(),
			from_date,
			next_from_date,
		})
	}
}
