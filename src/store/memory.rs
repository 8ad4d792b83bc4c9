//! In-process store with the same transactional behaviour as the Postgres store.
//!
//! Writes are buffered per session and applied on commit. Row locks and unique keys
//! claimed by an open session are visible to every other session, so concurrent jobs
//! observe lock contention and unique violations exactly as they would on Postgres.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{LocalStore, StoreError, StoreSession};
use crate::binding::{Backend, Binding, BindingId, NewBinding, Record, Storeview};
use crate::context::ExecContext;

type UniqueKey = (String, i64, i64);

/// A committed binding creation and the context it was made under.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingCreation {
	pub model: String,
	pub binding_id: BindingId,
	pub context: ExecContext,
}

#[derive(Default)]
struct MemoryState {
	next_binding_id: i64,
	next_record_id: i64,
	backends: HashMap<i64, Backend>,
	storeviews: Vec<Storeview>,
	bindings: BTreeMap<BindingId, Binding>,
	records: HashMap<(String, i64), Record>,
	translations: HashMap<(String, i64, String), Record>,
	locks: HashMap<BindingId, u64>,
	reserved: HashMap<UniqueKey, u64>,
	creations: Vec<BindingCreation>,
	import_dates: HashMap<(i64, String), DateTime<Utc>>,
}

impl MemoryState {
	fn release(&mut self, session: u64) {
		self.locks.retain(|_, owner| *owner != session);
		self.reserved.retain(|_, owner| *owner != session);
	}
}

fn guard(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
	state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unique_key(model: &str, backend_id: i64, record_id: i64) -> UniqueKey {
	(model.to_string(), backend_id, record_id)
}

#[derive(Clone, Default)]
pub struct MemoryStore {
	state: Arc<Mutex<MemoryState>>,
	sessions: Arc<AtomicU64>,
	open: Arc<AtomicUsize>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_backend(&self, backend: Backend) {
		guard(&self.state).backends.insert(backend.id, backend);
	}

	pub fn add_storeview(&self, storeview: Storeview) {
		guard(&self.state).storeviews.push(storeview);
	}

	/// Insert a committed record, or merge `values` into an existing one.
	pub fn insert_record(&self, model: &str, id: i64, values: Record) {
		let mut state = guard(&self.state);
		state.next_record_id = state.next_record_id.max(id);
		state
			.records
			.entry((model.to_string(), id))
			.or_default()
			.extend(values);
	}

	pub fn insert_translation(&self, model: &str, id: i64, lang: &str, values: Record) {
		guard(&self.state)
			.translations
			.insert((model.to_string(), id, lang.to_string()), values);
	}

	/// Insert an already committed binding, bypassing the session machinery.
	pub fn insert_binding(
		&self,
		model: &str,
		record_id: i64,
		backend_id: i64,
		remote_id: Option<&str>,
		sync_date: Option<DateTime<Utc>>,
	) -> BindingId {
		let mut state = guard(&self.state);
		state.next_binding_id += 1;
		let id = state.next_binding_id;
		state.bindings.insert(
			id,
			Binding {
				id,
				model: model.to_string(),
				record_id,
				backend_id,
				remote_id: remote_id.map(str::to_string),
				sync_date,
			},
		);
		id
	}

	/// Committed state of a binding.
	pub fn binding(&self, id: BindingId) -> Option<Binding> {
		guard(&self.state).bindings.get(&id).cloned()
	}

	pub fn bindings_for(&self, model: &str) -> Vec<Binding> {
		guard(&self.state)
			.bindings
			.values()
			.filter(|b| b.model == model)
			.cloned()
			.collect()
	}

	/// Committed values of a record.
	pub fn record(&self, model: &str, id: i64) -> Option<Record> {
		guard(&self.state)
			.records
			.get(&(model.to_string(), id))
			.cloned()
	}

	pub fn creations(&self) -> Vec<BindingCreation> {
		guard(&self.state).creations.clone()
	}

	pub fn is_locked(&self, id: BindingId) -> bool {
		guard(&self.state).locks.contains_key(&id)
	}

	/// Committed start date of the batch import `field`.
	pub fn import_from_date(&self, backend_id: i64, field: &str) -> Option<DateTime<Utc>> {
		guard(&self.state)
			.import_dates
			.get(&(backend_id, field.to_string()))
			.copied()
	}

	pub fn set_import_from_date(&self, backend_id: i64, field: &str, at: DateTime<Utc>) {
		guard(&self.state)
			.import_dates
			.insert((backend_id, field.to_string()), at);
	}

	/// Sessions begun and not yet committed, rolled back or dropped.
	pub fn open_sessions(&self) -> usize {
		self.open.load(Ordering::SeqCst)
	}

	/// Open a session with its concrete type, for callers that need to keep a
	/// scope open across other operations.
	pub fn session(&self) -> MemorySession {
		self.open.fetch_add(1, Ordering::SeqCst);
		MemorySession {
			id: self.sessions.fetch_add(1, Ordering::Relaxed) + 1,
			state: Arc::clone(&self.state),
			open: Arc::clone(&self.open),
			created: Vec::new(),
			binds: Vec::new(),
			writes: Vec::new(),
			creations: Vec::new(),
			dates: Vec::new(),
			closed: false,
		}
	}
}

#[async_trait]
impl LocalStore for MemoryStore {
	async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError> {
		Ok(Box::new(self.session()))
	}

	async fn ping(&self) -> Result<(), StoreError> {
		Ok(())
	}
}

pub struct MemorySession {
	id: u64,
	state: Arc<Mutex<MemoryState>>,
	open: Arc<AtomicUsize>,
	created: Vec<Binding>,
	binds: Vec<(BindingId, String, DateTime<Utc>)>,
	writes: Vec<((String, i64), Record)>,
	creations: Vec<BindingCreation>,
	dates: Vec<((i64, String), DateTime<Utc>)>,
	closed: bool,
}

impl MemorySession {
	/// Apply this session's pending binds on top of `binding`.
	fn overlay(&self, mut binding: Binding) -> Binding {
		for (id, remote_id, at) in &self.binds {
			if *id == binding.id {
				binding.remote_id = Some(remote_id.clone());
				binding.sync_date = Some(*at);
			}
		}
		binding
	}

	fn visible_bindings(&self) -> Vec<Binding> {
		let state = guard(&self.state);
		state
			.bindings
			.values()
			.chain(self.created.iter())
			.cloned()
			.map(|b| self.overlay(b))
			.collect()
	}

	fn lookup(&self, pred: impl Fn(&Binding) -> bool) -> Option<Binding> {
		self.visible_bindings().into_iter().find(|b| pred(b))
	}

	fn create_sync(
		&mut self,
		model: &str,
		new: &NewBinding,
		ctx: &ExecContext,
	) -> Result<BindingId, StoreError> {
		let key = unique_key(model, new.backend_id, new.record_id);
		let mut state = guard(&self.state);

		let committed = state.bindings.values().any(|b| {
			b.model == model && b.backend_id == new.backend_id && b.record_id == new.record_id
		});
		if committed || state.reserved.contains_key(&key) {
			return Err(StoreError::UniqueViolation(format!(
				"duplicate key value violates unique constraint \"sync_binding_record_uniq\": \
				 Key (model, backend_id, record_id)=({}, {}, {}) already exists",
				model, new.backend_id, new.record_id
			)));
		}

		state.next_binding_id += 1;
		let id = state.next_binding_id;
		state.reserved.insert(key, self.id);
		drop(state);

		self.created.push(Binding {
			id,
			model: model.to_string(),
			record_id: new.record_id,
			backend_id: new.backend_id,
			remote_id: None,
			sync_date: None,
		});
		self.creations.push(BindingCreation {
			model: model.to_string(),
			binding_id: id,
			context: ctx.clone(),
		});
		Ok(id)
	}

	fn lock_sync(&mut self, model: &str, id: BindingId) -> Result<bool, StoreError> {
		if self.lookup(|b| b.model == model && b.id == id).is_none() {
			return Err(StoreError::RecordMissing {
				model: model.to_string(),
				id,
			});
		}
		let mut state = guard(&self.state);
		match state.locks.get(&id) {
			Some(owner) if *owner != self.id => Ok(false),
			_ => {
				state.locks.insert(id, self.id);
				Ok(true)
			}
		}
	}

	fn read_sync(&self, model: &str, id: i64, ctx: &ExecContext) -> Result<Record, StoreError> {
		let key = (model.to_string(), id);
		let state = guard(&self.state);
		let mut values = state.records.get(&key).cloned();
		for (k, pending) in &self.writes {
			if *k == key {
				values.get_or_insert_with(Record::new).extend(pending.clone());
			}
		}
		let mut values = values.ok_or_else(|| StoreError::RecordMissing {
			model: model.to_string(),
			id,
		})?;
		if let Some(lang) = &ctx.locale {
			if let Some(translated) = state.translations.get(&(model.to_string(), id, lang.clone())) {
				values.extend(translated.clone());
			}
		}
		Ok(values)
	}

	fn write_sync(&mut self, model: &str, id: Option<i64>, values: &Record) -> i64 {
		let id = match id {
			Some(id) => id,
			None => {
				let mut state = guard(&self.state);
				state.next_record_id += 1;
				state.next_record_id
			}
		};
		self.writes.push(((model.to_string(), id), values.clone()));
		id
	}

	fn commit_sync(&mut self) -> Result<(), StoreError> {
		let mut state = guard(&self.state);
		for binding in self.created.drain(..) {
			state.bindings.insert(binding.id, binding);
		}
		for (id, remote_id, at) in self.binds.drain(..) {
			if let Some(binding) = state.bindings.get_mut(&id) {
				binding.remote_id = Some(remote_id);
				binding.sync_date = Some(at);
			}
		}
		for (key, values) in self.writes.drain(..) {
			state.records.entry(key).or_default().extend(values);
		}
		state.creations.append(&mut self.creations);
		state.import_dates.extend(self.dates.drain(..));
		state.release(self.id);
		self.closed = true;
		self.open.fetch_sub(1, Ordering::SeqCst);
		Ok(())
	}

	fn close(&mut self) {
		if !self.closed {
			guard(&self.state).release(self.id);
			self.closed = true;
			self.open.fetch_sub(1, Ordering::SeqCst);
		}
	}
}

impl Drop for MemorySession {
	fn drop(&mut self) {
		self.close();
	}
}

#[async_trait]
impl StoreSession for MemorySession {
	async fn backend(&mut self, id: i64) -> Result<Option<Backend>, StoreError> {
		Ok(guard(&self.state).backends.get(&id).cloned())
	}

	async fn storeviews(&mut self, backend_id: i64) -> Result<Vec<Storeview>, StoreError> {
		Ok(guard(&self.state)
			.storeviews
			.iter()
			.filter(|sv| sv.backend_id == backend_id)
			.cloned()
			.collect())
	}

	async fn binding(&mut self, model: &str, id: BindingId) -> Result<Option<Binding>, StoreError> {
		Ok(self.lookup(|b| b.model == model && b.id == id))
	}

	async fn find_binding(
		&mut self,
		model: &str,
		record_id: i64,
		backend_id: i64,
	) -> Result<Option<Binding>, StoreError> {
		Ok(self.lookup(|b| {
			b.model == model && b.record_id == record_id && b.backend_id == backend_id
		}))
	}

	async fn binding_by_remote(
		&mut self,
		model: &str,
		backend_id: i64,
		remote_id: &str,
	) -> Result<Option<Binding>, StoreError> {
		Ok(self.lookup(|b| {
			b.model == model
				&& b.backend_id == backend_id
				&& b.remote_id.as_deref() == Some(remote_id)
		}))
	}

	async fn create_binding(
		&mut self,
		model: &str,
		new: &NewBinding,
		ctx: &ExecContext,
	) -> Result<BindingId, StoreError> {
		self.create_sync(model, new, ctx)
	}

	async fn try_lock(&mut self, model: &str, id: BindingId) -> Result<bool, StoreError> {
		self.lock_sync(model, id)
	}

	async fn bind(
		&mut self,
		model: &str,
		id: BindingId,
		remote_id: &str,
		at: DateTime<Utc>,
	) -> Result<(), StoreError> {
		if self.lookup(|b| b.model == model && b.id == id).is_none() {
			return Err(StoreError::RecordMissing {
				model: model.to_string(),
				id,
			});
		}
		if let Some(binding) = self.created.iter_mut().find(|b| b.id == id) {
			binding.remote_id = Some(remote_id.to_string());
			binding.sync_date = Some(at);
		} else {
			self.binds.push((id, remote_id.to_string(), at));
		}
		Ok(())
	}

	async fn read_record(
		&mut self,
		model: &str,
		id: i64,
		ctx: &ExecContext,
	) -> Result<Record, StoreError> {
		self.read_sync(model, id, ctx)
	}

	async fn write_record(
		&mut self,
		model: &str,
		id: Option<i64>,
		values: &Record,
		_ctx: &ExecContext,
	) -> Result<i64, StoreError> {
		Ok(self.write_sync(model, id, values))
	}

	async fn import_from_date(
		&mut self,
		backend_id: i64,
		field: &str,
	) -> Result<Option<DateTime<Utc>>, StoreError> {
		let key = (backend_id, field.to_string());
		let pending = self.dates.iter().rev().find(|(k, _)| *k == key).map(|(_, at)| *at);
		Ok(pending.or_else(|| guard(&self.state).import_dates.get(&key).copied()))
	}

	async fn set_import_from_date(
		&mut self,
		backend_id: i64,
		field: &str,
		at: DateTime<Utc>,
	) -> Result<(), StoreError> {
		self.dates.push(((backend_id, field.to_string()), at));
		Ok(())
	}

	async fn commit(self: Box<Self>) -> Result<(), StoreError> {
		let mut session = self;
		session.commit_sync()
	}

	async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
		let mut session = self;
		session.close();
		Ok(())
	}
}
