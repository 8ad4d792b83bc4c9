use std::collections::HashMap;
use std::sync::Arc;

use super::flow::ExportFlow;
use crate::backend::BackendAdapter;
use crate::binding::Backend;
use crate::context::ExecContext;
use crate::error::SyncError;
use crate::mapper::RecordMapper;
use crate::observability::MetricsRegistry;
use crate::queue::JobQueue;
use crate::store::LocalStore;

/// Default bound on nested dependency exports.
pub const DEFAULT_MAX_DEPENDENCY_DEPTH: usize = 16;

/// Everything needed to synchronize one binding model.
pub struct ModelUnits {
	/// Binding model name, e.g. `magento.product.product`.
	pub binding_model: String,
	/// Local model wrapped by the binding, e.g. `product.product`.
	pub record_model: String,
	pub adapter: Arc<dyn BackendAdapter>,
	pub mapper: Arc<dyn RecordMapper>,
	pub flow: Arc<dyn ExportFlow>,
}

/// Shared state of the synchronization engine for one backend.
pub struct ConnectorEnv {
	pub backend: Backend,
	pub store: Arc<dyn LocalStore>,
	pub queue: Arc<dyn JobQueue>,
	pub metrics: Arc<MetricsRegistry>,
	/// Base context of the jobs run in this environment.
	pub ctx: ExecContext,
	pub max_dependency_depth: usize,
	models: HashMap<String, Arc<ModelUnits>>,
}

impl ConnectorEnv {
	pub fn new(
		backend: Backend,
		store: Arc<dyn LocalStore>,
		queue: Arc<dyn JobQueue>,
		metrics: Arc<MetricsRegistry>,
	) -> Self {
		Self {
			backend,
			store,
			queue,
			metrics,
			ctx: ExecContext::worker("relay"),
			max_dependency_depth: DEFAULT_MAX_DEPENDENCY_DEPTH,
			models: HashMap::new(),
		}
	}

	/// Build an environment for `backend_id`, reading the backend row from the store.
	pub async fn for_backend(
		backend_id: i64,
		store: Arc<dyn LocalStore>,
		queue: Arc<dyn JobQueue>,
		metrics: Arc<MetricsRegistry>,
	) -> Result<Self, SyncError> {
		let mut session = store.begin().await?;
		let backend = session.backend(backend_id).await?;
		session.rollback().await?;
		let backend = backend.ok_or(SyncError::UnknownBackend(backend_id))?;
		Ok(Self::new(backend, store, queue, metrics))
	}

	pub fn with_exec_context(mut self, ctx: ExecContext) -> Self {
		self.ctx = ctx;
		self
	}

	pub fn with_max_dependency_depth(mut self, depth: usize) -> Self {
		self.max_dependency_depth = depth;
		self
	}

	pub fn register(mut self, units: ModelUnits) -> Self {
		self.models
			.insert(units.binding_model.clone(), Arc::new(units));
		self
	}

	pub fn units(&self, binding_model: &str) -> Result<Arc<ModelUnits>, SyncError> {
		self.models
			.get(binding_model)
			.cloned()
			.ok_or_else(|| SyncError::UnknownModel(binding_model.to_string()))
	}

	pub fn models(&self) -> impl Iterator<Item = &str> {
		self.models.keys().map(String::as_str)
	}
}
