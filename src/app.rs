//! Wiring of settings into a running engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::info;
use url::Url;

use crate::backend::{BackendAdapter, HttpAdapter};
use crate::config::{ModelSettings, Settings};
use crate::context::ExecContext;
use crate::export::{ConnectorEnv, ModelUnits};
use crate::import::attribute_price::PRICE_BINDING_MODEL;
use crate::import::{AttributePriceImporter, ImporterRegistry, RecordImporter};
use crate::mapper::FieldMapper;
use crate::observability::MetricsRegistry;
use crate::queue::ChannelQueue;
use crate::store::{LocalStore, PgStore};
use crate::worker::{Dispatcher, RetryPolicy, WorkerPool};

/// Migration creating the synchronization tables.
pub const MIGRATION_V1: &str = include_str!("../sql/v1/001-create_sync_tables.sql");

/// Export and import units of one configured model, sharing one adapter.
fn model_units(
	model: &ModelSettings,
	adapter: Arc<dyn BackendAdapter>,
) -> (ModelUnits, RecordImporter) {
	let importer = RecordImporter::new(
		model.binding_model.as_str(),
		model.record_model.as_str(),
		Arc::clone(&adapter),
		Arc::new(FieldMapper::new(model.import_rules())),
	);
	let units = ModelUnits {
		binding_model: model.binding_model.clone(),
		record_model: model.record_model.clone(),
		adapter,
		mapper: Arc::new(FieldMapper::new(model.fields.clone())),
		flow: Arc::new(model.flow.clone()),
	};
	(units, importer)
}

/// Build the engine for `settings.backend_id`, with one HTTP adapter per configured
/// model. Returns the environment and the importers for the same models.
pub async fn build_env(
	settings: &Settings,
	store: Arc<dyn LocalStore>,
	queue: ChannelQueue,
	metrics: Arc<MetricsRegistry>,
) -> anyhow::Result<(ConnectorEnv, ImporterRegistry)> {
	let base_url = Url::parse(&settings.backend_url)
		.with_context(|| format!("invalid backend_url '{}'", settings.backend_url))?;
	let client = reqwest::Client::builder()
		.timeout(Duration::from_secs(settings.http_timeout_secs))
		.build()
		.context("failed to build the HTTP client")?;

	let mut env = ConnectorEnv::for_backend(settings.backend_id, store, Arc::new(queue), metrics)
		.await?
		.with_exec_context(ExecContext::worker(settings.worker_name.as_str()))
		.with_max_dependency_depth(settings.max_dependency_depth);
	let mut importers = ImporterRegistry::new();

	for model in &settings.models {
		let adapter: Arc<dyn BackendAdapter> = Arc::new(HttpAdapter::with_client(
			client.clone(),
			base_url.clone(),
			model.resource.as_str(),
			settings.backend_token.clone(),
		));
		let (units, importer) = model_units(model, adapter);
		importers.register(model.binding_model.as_str(), Arc::new(importer));
		env = env.register(units);
		info!("registered model {} ({})", model.binding_model, model.resource);
	}
	importers.register(PRICE_BINDING_MODEL, Arc::new(AttributePriceImporter::default()));

	Ok((env, importers))
}

/// A running engine: environment plus worker pool.
pub struct Relay {
	pub env: Arc<ConnectorEnv>,
	pub pool: WorkerPool,
}

impl Relay {
	/// Connect to the database and start `settings.workers` workers.
	pub async fn start(settings: &Settings, metrics: Arc<MetricsRegistry>) -> anyhow::Result<Self> {
		let store = PgStore::connect(&settings.database_url)
			.await
			.context("failed to connect to the database")?;
		Self::start_with(settings, Arc::new(store), metrics).await
	}

	pub async fn start_with(
		settings: &Settings,
		store: Arc<dyn LocalStore>,
		metrics: Arc<MetricsRegistry>,
	) -> anyhow::Result<Self> {
		let (queue, rx) = ChannelQueue::new(settings.queue_capacity.max(1));
		let (env, importers) = build_env(settings, store, queue.clone(), metrics).await?;
		let env = Arc::new(env);
		let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&env), Arc::new(importers)));
		let policy = RetryPolicy::new(
			settings.max_retries,
			Duration::from_secs(settings.retry_base_secs),
		);
		info!("starting {} worker(s)", settings.workers.max(1));
		let pool = WorkerPool::start(dispatcher, queue, rx, policy, settings.workers);
		Ok(Self { env, pool })
	}
}
