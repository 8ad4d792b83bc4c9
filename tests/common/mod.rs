//! Common test utilities and helpers for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use catalog_relay::backend::{BackendAdapter, BackendError, SearchFilter};
use catalog_relay::binding::{Backend, Payload, Record, Storeview};
use catalog_relay::export::staleness::parse_backend_date;
use catalog_relay::export::{
	ConnectorEnv, DefaultFlow, DependencyRule, ExportFlow, ModelUnits, StandardFlow,
};
use catalog_relay::mapper::{FieldMapper, FieldRule};
use catalog_relay::observability::MetricsRegistry;
use catalog_relay::queue::{Job, JobQueue, QueueError};
use catalog_relay::store::MemoryStore;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::{Duration, sleep};

pub const BACKEND_ID: i64 = 1;
pub const PRODUCT: &str = "magento.product.product";
pub const PRODUCT_RECORD: &str = "product.product";
pub const CATEGORY: &str = "magento.product.category";
pub const CATEGORY_RECORD: &str = "product.category";

/// Check if Docker integration tests are enabled via environment variable.
/// Returns true if RUN_DOCKER_INTEGRATION_TESTS is set.
pub fn is_docker_test_enabled() -> bool {
	env::var("RUN_DOCKER_INTEGRATION_TESTS").is_ok()
}

/// Skip the test with a message if Docker integration tests are not enabled.
/// Returns true if the test should proceed, false if it should be skipped.
pub fn check_docker_enabled() -> bool {
	if !is_docker_test_enabled() {
		eprintln!("Skipping Docker integration test; set RUN_DOCKER_INTEGRATION_TESTS=1 to enable");
		return false;
	}
	true
}

/// Wait for Postgres to accept connections with a maximum retry count.
/// Returns the connection pool on success, or an error if retries exhausted.
pub async fn wait_for_postgres(
	connection_string: &str,
	max_retries: u32,
) -> Result<sqlx::PgPool, String> {
	let mut attempts = 0;
	loop {
		match sqlx::PgPool::connect(connection_string).await {
			Ok(pool) => return Ok(pool),
			Err(e) => {
				attempts += 1;
				if attempts >= max_retries {
					return Err(format!(
						"Postgres did not become ready after {} attempts: {}",
						max_retries, e
					));
				}
				sleep(Duration::from_secs(1)).await;
			}
		}
	}
}

/// Object literal to record.
pub fn rec(value: Value) -> Record {
	match value {
		Value::Object(map) => map,
		other => panic!("not an object: {}", other),
	}
}

/// One call received by [`MockAdapter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
	Read(String),
	Search(SearchFilter),
	Create(Payload),
	Write {
		remote_id: String,
		data: Payload,
		storeview: Option<String>,
	},
}

/// Pauses [`MockAdapter::create`] until released.
#[derive(Default)]
pub struct Gate {
	pub entered: Notify,
	pub release: Notify,
}

/// In-memory backend that records every call.
pub struct MockAdapter {
	calls: Mutex<Vec<Call>>,
	next_id: AtomicU64,
	remote: Mutex<HashMap<String, Record>>,
	missing: Mutex<HashSet<String>>,
	failing_storeviews: Mutex<HashSet<String>>,
	gate: Option<Arc<Gate>>,
}

impl MockAdapter {
	/// Adapter handing out remote ids from `first_id` upwards.
	pub fn starting_at(first_id: u64) -> Self {
		Self {
			calls: Mutex::new(Vec::new()),
			next_id: AtomicU64::new(first_id),
			remote: Mutex::new(HashMap::new()),
			missing: Mutex::new(HashSet::new()),
			failing_storeviews: Mutex::new(HashSet::new()),
			gate: None,
		}
	}

	pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
		self.gate = Some(gate);
		self
	}

	pub fn set_remote(&self, remote_id: &str, record: Record) {
		self.remote
			.lock()
			.unwrap()
			.insert(remote_id.to_string(), record);
	}

	pub fn mark_missing(&self, remote_id: &str) {
		self.missing.lock().unwrap().insert(remote_id.to_string());
	}

	pub fn fail_storeview(&self, code: &str) {
		self.failing_storeviews
			.lock()
			.unwrap()
			.insert(code.to_string());
	}

	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().unwrap().clone()
	}

	pub fn creates(&self) -> Vec<Payload> {
		self.calls()
			.into_iter()
			.filter_map(|c| match c {
				Call::Create(data) => Some(data),
				_ => None,
			})
			.collect()
	}

	/// Writes as (remote id, payload, storeview).
	pub fn writes(&self) -> Vec<(String, Payload, Option<String>)> {
		self.calls()
			.into_iter()
			.filter_map(|c| match c {
				Call::Write {
					remote_id,
					data,
					storeview,
				} => Some((remote_id, data, storeview)),
				_ => None,
			})
			.collect()
	}

	pub fn reads(&self) -> usize {
		self.calls()
			.iter()
			.filter(|c| matches!(c, Call::Read(_)))
			.count()
	}

	/// Creates plus writes.
	pub fn mutations(&self) -> usize {
		self.calls()
			.iter()
			.filter(|c| matches!(c, Call::Create(_) | Call::Write { .. }))
			.count()
	}

	pub fn searches(&self) -> Vec<SearchFilter> {
		self.calls()
			.into_iter()
			.filter_map(|c| match c {
				Call::Search(filter) => Some(filter),
				_ => None,
			})
			.collect()
	}

	fn record(&self, call: Call) {
		self.calls.lock().unwrap().push(call);
	}
}

impl Default for MockAdapter {
	fn default() -> Self {
		Self::starting_at(1000)
	}
}

#[async_trait]
impl BackendAdapter for MockAdapter {
	async fn read(&self, remote_id: &str, _attributes: &[&str]) -> Result<Record, BackendError> {
		self.record(Call::Read(remote_id.to_string()));
		if self.missing.lock().unwrap().contains(remote_id) {
			return Err(BackendError::IdMissing(remote_id.to_string()));
		}
		Ok(self
			.remote
			.lock()
			.unwrap()
			.get(remote_id)
			.cloned()
			.unwrap_or_default())
	}

	/// Matches remote records on `type_id` and on `updated_at` within `[from, to)`.
	async fn search(&self, filter: &SearchFilter) -> Result<Vec<String>, BackendError> {
		self.record(Call::Search(filter.clone()));
		let remote = self.remote.lock().unwrap();
		let mut ids: Vec<String> = remote
			.iter()
			.filter(|(_, record)| match &filter.type_id {
				Some(type_id) => record.get("type_id").and_then(Value::as_str) == Some(type_id),
				None => true,
			})
			.filter(|(_, record)| {
				let updated = record.get("updated_at").and_then(parse_backend_date);
				match updated {
					Some(at) => {
						filter.updated_from.is_none_or(|from| at >= from)
							&& filter.updated_to.is_none_or(|to| at < to)
					}
					None => filter.updated_from.is_none(),
				}
			})
			.map(|(id, _)| id.clone())
			.collect();
		ids.sort();
		Ok(ids)
	}

	async fn create(&self, data: &Payload) -> Result<String, BackendError> {
		self.record(Call::Create(data.clone()));
		if let Some(gate) = &self.gate {
			gate.entered.notify_one();
			gate.release.notified().await;
		}
		Ok(self.next_id.fetch_add(1, Ordering::SeqCst).to_string())
	}

	async fn write(
		&self,
		remote_id: &str,
		data: &Payload,
		storeview: Option<&str>,
	) -> Result<(), BackendError> {
		self.record(Call::Write {
			remote_id: remote_id.to_string(),
			data: data.clone(),
			storeview: storeview.map(str::to_string),
		});
		if self.missing.lock().unwrap().contains(remote_id) {
			return Err(BackendError::IdMissing(remote_id.to_string()));
		}
		if let Some(code) = storeview {
			if self.failing_storeviews.lock().unwrap().contains(code) {
				return Err(BackendError::Rejected {
					status: 500,
					body: format!("storeview {} unavailable", code),
				});
			}
		}
		Ok(())
	}
}

/// Queue that only remembers what was enqueued.
#[derive(Default)]
pub struct RecordingQueue {
	jobs: Mutex<Vec<Job>>,
}

impl RecordingQueue {
	pub fn jobs(&self) -> Vec<Job> {
		self.jobs.lock().unwrap().clone()
	}
}

#[async_trait]
impl JobQueue for RecordingQueue {
	async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
		self.jobs.lock().unwrap().push(job);
		Ok(())
	}
}

pub fn backend() -> Backend {
	Backend {
		id: BACKEND_ID,
		name: "shop".into(),
		default_lang: Some("en_US".into()),
	}
}

pub fn storeview(id: i64, name: &str, lang: &str) -> Storeview {
	Storeview {
		id,
		backend_id: BACKEND_ID,
		name: name.into(),
		lang: Some(lang.into()),
		remote_id: Some(name.into()),
	}
}

pub fn product_mapper() -> FieldMapper {
	FieldMapper::new(vec![
		FieldRule::direct("name", "name").translatable(),
		FieldRule::direct("description", "description").translatable(),
		FieldRule::direct("default_code", "sku").create_only(),
		FieldRule::direct("list_price", "price"),
	])
}

/// Products depend on their category, need a sku on create and are translated.
pub fn product_flow() -> StandardFlow {
	StandardFlow::new()
		.depends_on(DependencyRule::new("categ_id", CATEGORY_RECORD, CATEGORY))
		.require_on_create("sku")
		.with_translations()
}

pub fn product_units(adapter: Arc<MockAdapter>, flow: Arc<dyn ExportFlow>) -> ModelUnits {
	ModelUnits {
		binding_model: PRODUCT.into(),
		record_model: PRODUCT_RECORD.into(),
		adapter,
		mapper: Arc::new(product_mapper()),
		flow,
	}
}

pub fn category_units(adapter: Arc<MockAdapter>) -> ModelUnits {
	ModelUnits {
		binding_model: CATEGORY.into(),
		record_model: CATEGORY_RECORD.into(),
		adapter,
		mapper: Arc::new(FieldMapper::new(vec![FieldRule::direct("name", "name")])),
		flow: Arc::new(DefaultFlow),
	}
}

/// Everything a test needs to drive exports against the memory store.
pub struct Fixture {
	pub store: MemoryStore,
	pub products: Arc<MockAdapter>,
	pub categories: Arc<MockAdapter>,
	pub queue: Arc<RecordingQueue>,
	pub env: Arc<ConnectorEnv>,
}

pub fn metrics() -> Arc<MetricsRegistry> {
	Arc::new(MetricsRegistry::new().unwrap())
}

/// Memory store with the backend registered, plus a product and a category record.
pub fn seeded_store() -> MemoryStore {
	let store = MemoryStore::new();
	store.add_backend(backend());
	store.insert_record(
		PRODUCT_RECORD,
		10,
		rec(serde_json::json!({
			"name": "Chair",
			"description": "Wooden chair",
			"default_code": "CH-1",
			"list_price": 25.0,
			"categ_id": false
		})),
	);
	store.insert_record(CATEGORY_RECORD, 5, rec(serde_json::json!({"name": "Chairs"})));
	store
}

pub fn build_env(
	store: &MemoryStore,
	products: Arc<MockAdapter>,
	categories: Arc<MockAdapter>,
	queue: Arc<dyn JobQueue>,
	flow: Arc<dyn ExportFlow>,
) -> Arc<ConnectorEnv> {
	Arc::new(
		ConnectorEnv::new(backend(), Arc::new(store.clone()), queue, metrics())
			.register(product_units(products, flow))
			.register(category_units(categories)),
	)
}

pub fn fixture_with(products: MockAdapter, flow: Arc<dyn ExportFlow>) -> Fixture {
	let store = seeded_store();
	let products = Arc::new(products);
	let categories = Arc::new(MockAdapter::starting_at(2000));
	let queue = Arc::new(RecordingQueue::default());
	let env = build_env(
		&store,
		Arc::clone(&products),
		Arc::clone(&categories),
		queue.clone(),
		flow,
	);
	Fixture {
		store,
		products,
		categories,
		queue,
		env,
	}
}

pub fn fixture() -> Fixture {
	fixture_with(MockAdapter::default(), Arc::new(product_flow()))
}
