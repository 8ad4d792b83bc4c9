pub mod memory;
pub mod postgres;

pub use memory::{BindingCreation, MemoryStore};
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::binding::{Backend, Binding, BindingId, NewBinding, Record, Storeview};
use crate::context::ExecContext;

#[derive(Debug, Error)]
pub enum StoreError {
	/// A unique constraint rejected the write, typically because a concurrent job
	/// created the same binding first.
	#[error("unique constraint violated: {0}")]
	UniqueViolation(String),

	#[error("{model} record {id} does not exist")]
	RecordMissing { model: String, id: i64 },

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("failed to decode stored value: {0}")]
	Decode(String),
}

/// Entry point to the local store. Every call to [`LocalStore::begin`] opens an
/// independent transactional scope; commits in one scope never wait for another.
#[async_trait]
pub trait LocalStore: Send + Sync + 'static {
	async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError>;

	/// Lightweight check that the store is reachable.
	async fn ping(&self) -> Result<(), StoreError>;
}

/// One transactional scope on the local store. Row locks taken with
/// [`StoreSession::try_lock`] are held until `commit`, `rollback` or drop.
#[async_trait]
pub trait StoreSession: Send {
	async fn backend(&mut self, id: i64) -> Result<Option<Backend>, StoreError>;

	async fn storeviews(&mut self, backend_id: i64) -> Result<Vec<Storeview>, StoreError>;

	async fn binding(&mut self, model: &str, id: BindingId) -> Result<Option<Binding>, StoreError>;

	async fn find_binding(
		&mut self,
		model: &str,
		record_id: i64,
		backend_id: i64,
	) -> Result<Option<Binding>, StoreError>;

	async fn binding_by_remote(
		&mut self,
		model: &str,
		backend_id: i64,
		remote_id: &str,
	) -> Result<Option<Binding>, StoreError>;

	/// Insert a binding row. Must fail with [`StoreError::UniqueViolation`] when a
	/// binding for the same (model, record, backend) exists or is being created by
	/// another open scope.
	async fn create_binding(
		&mut self,
		model: &str,
		new: &NewBinding,
		ctx: &ExecContext,
	) -> Result<BindingId, StoreError>;

	/// Try to take the exclusive lock on a binding row. Returns `Ok(false)` at once
	/// when another scope holds it; never waits.
	async fn try_lock(&mut self, model: &str, id: BindingId) -> Result<bool, StoreError>;

	/// Record the remote id and the synchronization date of a binding.
	async fn bind(
		&mut self,
		model: &str,
		id: BindingId,
		remote_id: &str,
		at: DateTime<Utc>,
	) -> Result<(), StoreError>;

	/// Read a local record, with translatable values in `ctx.locale` when set.
	async fn read_record(
		&mut self,
		model: &str,
		id: i64,
		ctx: &ExecContext,
	) -> Result<Record, StoreError>;

	/// Create (`id == None`) or update a local record, returning its id.
	async fn write_record(
		&mut self,
		model: &str,
		id: Option<i64>,
		values: &Record,
		ctx: &ExecContext,
	) -> Result<i64, StoreError>;

	/// Date a batch import named `field` starts from on the next run.
	async fn import_from_date(
		&mut self,
		backend_id: i64,
		field: &str,
	) -> Result<Option<DateTime<Utc>>, StoreError>;

	async fn set_import_from_date(
		&mut self,
		backend_id: i64,
		field: &str,
		at: DateTime<Utc>,
	) -> Result<(), StoreError>;

	async fn commit(self: Box<Self>) -> Result<(), StoreError>;

	async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
