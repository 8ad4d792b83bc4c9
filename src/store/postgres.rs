use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{LocalStore, StoreError, StoreSession};
use crate::binding::{Backend, Binding, BindingId, NewBinding, Record, Storeview};
use crate::context::ExecContext;

/// SQLSTATE raised when an insert violates a unique constraint.
const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE raised by `FOR UPDATE NOWAIT` when the row is locked elsewhere.
const LOCK_NOT_AVAILABLE: &str = "55P03";

const BINDING_COLUMNS: &str = "id, model, record_id, backend_id, remote_id, sync_date";

/// Postgres implementation of the local store.
pub struct PgStore {
	pool: PgPool,
}

impl PgStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	/// Connect helper using a DATABASE_URL-like string
	pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
		let pool = PgPool::connect(database_url).await?;
		Ok(Self::new(pool))
	}

	/// Apply an SQL migration script (multiple statements are allowed).
	pub async fn apply_migration(&self, sql: &str) -> Result<(), StoreError> {
		sqlx::Executor::execute(&self.pool, sql).await?;
		Ok(())
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}
}

#[async_trait]
impl LocalStore for PgStore {
	async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError> {
		let tx = self.pool.begin().await?;
		Ok(Box::new(PgSession { tx }))
	}

	async fn ping(&self) -> Result<(), StoreError> {
		sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
		Ok(())
	}
}

/// One Postgres transaction. Dropping it without commit rolls back.
pub struct PgSession {
	tx: Transaction<'static, Postgres>,
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
	match err {
		sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
		_ => None,
	}
}

fn binding_from_row(row: &PgRow) -> Result<Binding, StoreError> {
	Ok(Binding {
		id: row.try_get("id")?,
		model: row.try_get("model")?,
		record_id: row.try_get("record_id")?,
		backend_id: row.try_get("backend_id")?,
		remote_id: row.try_get("remote_id")?,
		sync_date: row.try_get("sync_date")?,
	})
}

fn object(value: Value, model: &str, id: i64) -> Result<Record, StoreError> {
	match value {
		Value::Object(map) => Ok(map),
		other => Err(StoreError::Decode(format!(
			"{} record {} holds non-object data: {}",
			model, id, other
		))),
	}
}

impl PgSession {
	async fn fetch_binding(
		&mut self,
		filter: &str,
		model: &str,
		a: i64,
		b: Option<i64>,
	) -> Result<Option<Binding>, StoreError> {
		let sql = format!(
			"SELECT {} FROM sync_binding WHERE model = $1 AND {}",
			BINDING_COLUMNS, filter
		);
		let mut query = sqlx::query(&sql).bind(model).bind(a);
		if let Some(b) = b {
			query = query.bind(b);
		}
		let row = query.fetch_optional(&mut *self.tx).await?;
		row.as_ref().map(binding_from_row).transpose()
	}
}

#[async_trait]
impl StoreSession for PgSession {
	async fn backend(&mut self, id: i64) -> Result<Option<Backend>, StoreError> {
		let row = sqlx::query("SELECT id, name, default_lang FROM sync_backend WHERE id = $1")
			.bind(id)
			.fetch_optional(&mut *self.tx)
			.await?;
		row.map(|r| -> Result<Backend, StoreError> {
			Ok(Backend {
				id: r.try_get("id")?,
				name: r.try_get("name")?,
				default_lang: r.try_get("default_lang")?,
			})
		})
		.transpose()
	}

	async fn storeviews(&mut self, backend_id: i64) -> Result<Vec<Storeview>, StoreError> {
		let rows = sqlx::query(
			"SELECT id, backend_id, name, lang, remote_id FROM sync_storeview \
			 WHERE backend_id = $1 ORDER BY id",
		)
		.bind(backend_id)
		.fetch_all(&mut *self.tx)
		.await?;
		rows.iter()
			.map(|r| -> Result<Storeview, StoreError> {
				Ok(Storeview {
					id: r.try_get("id")?,
					backend_id: r.try_get("backend_id")?,
					name: r.try_get("name")?,
					lang: r.try_get("lang")?,
					remote_id: r.try_get("remote_id")?,
				})
			})
			.collect()
	}

	async fn binding(&mut self, model: &str, id: BindingId) -> Result<Option<Binding>, StoreError> {
		self.fetch_binding("id = $2", model, id, None).await
	}

	async fn find_binding(
		&mut self,
		model: &str,
		record_id: i64,
		backend_id: i64,
	) -> Result<Option<Binding>, StoreError> {
		self.fetch_binding(
			"record_id = $2 AND backend_id = $3",
			model,
			record_id,
			Some(backend_id),
		)
		.await
	}

	async fn binding_by_remote(
		&mut self,
		model: &str,
		backend_id: i64,
		remote_id: &str,
	) -> Result<Option<Binding>, StoreError> {
		let sql = format!(
			"SELECT {} FROM sync_binding WHERE model = $1 AND backend_id = $2 AND remote_id = $3",
			BINDING_COLUMNS
		);
		let row = sqlx::query(&sql)
			.bind(model)
			.bind(backend_id)
			.bind(remote_id)
			.fetch_optional(&mut *self.tx)
			.await?;
		row.as_ref().map(binding_from_row).transpose()
	}

	async fn create_binding(
		&mut self,
		model: &str,
		new: &NewBinding,
		ctx: &ExecContext,
	) -> Result<BindingId, StoreError> {
		// Database triggers that enqueue exports read this flag.
		sqlx::query("SELECT set_config('relay.no_export', $1, true)")
			.bind(if ctx.no_export { "on" } else { "off" })
			.execute(&mut *self.tx)
			.await?;

		let res = sqlx::query(
			"INSERT INTO sync_binding (model, record_id, backend_id, extra, create_uid) \
			 VALUES ($1, $2, $3, $4, $5) RETURNING id",
		)
		.bind(model)
		.bind(new.record_id)
		.bind(new.backend_id)
		.bind(Value::Object(new.extra.clone()))
		.bind(ctx.identity.to_string())
		.fetch_one(&mut *self.tx)
		.await;

		match res {
			Ok(row) => Ok(row.try_get("id")?),
			Err(e) if sqlstate(&e).as_deref() == Some(UNIQUE_VIOLATION) => {
				Err(StoreError::UniqueViolation(e.to_string()))
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn try_lock(&mut self, model: &str, id: BindingId) -> Result<bool, StoreError> {
		let res = sqlx::query("SELECT id FROM sync_binding WHERE model = $1 AND id = $2 FOR UPDATE NOWAIT")
			.bind(model)
			.bind(id)
			.fetch_optional(&mut *self.tx)
			.await;

		match res {
			Ok(Some(_)) => Ok(true),
			Ok(None) => Err(StoreError::RecordMissing {
				model: model.to_string(),
				id,
			}),
			Err(e) if sqlstate(&e).as_deref() == Some(LOCK_NOT_AVAILABLE) => {
				debug!("binding {} #{} is locked by another transaction", model, id);
				Ok(false)
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn bind(
		&mut self,
		model: &str,
		id: BindingId,
		remote_id: &str,
		at: DateTime<Utc>,
	) -> Result<(), StoreError> {
		let done = sqlx::query(
			"UPDATE sync_binding SET remote_id = $1, sync_date = $2 WHERE model = $3 AND id = $4",
		)
		.bind(remote_id)
		.bind(at)
		.bind(model)
		.bind(id)
		.execute(&mut *self.tx)
		.await?;
		if done.rows_affected() == 0 {
			return Err(StoreError::RecordMissing {
				model: model.to_string(),
				id,
			});
		}
		Ok(())
	}

	async fn read_record(
		&mut self,
		model: &str,
		id: i64,
		ctx: &ExecContext,
	) -> Result<Record, StoreError> {
		let base: Option<Value> = sqlx::query_scalar(
			"SELECT data FROM sync_record WHERE model = $1 AND id = $2 AND locale = ''",
		)
		.bind(model)
		.bind(id)
		.fetch_optional(&mut *self.tx)
		.await?;
		let mut values = match base {
			Some(data) => object(data, model, id)?,
			None => {
				return Err(StoreError::RecordMissing {
					model: model.to_string(),
					id,
				});
			}
		};

		if let Some(lang) = &ctx.locale {
			let translated: Option<Value> = sqlx::query_scalar(
				"SELECT data FROM sync_record WHERE model = $1 AND id = $2 AND locale = $3",
			)
			.bind(model)
			.bind(id)
			.bind(lang)
			.fetch_optional(&mut *self.tx)
			.await?;
			if let Some(data) = translated {
				values.extend(object(data, model, id)?);
			}
		}
		Ok(values)
	}

	async fn write_record(
		&mut self,
		model: &str,
		id: Option<i64>,
		values: &Record,
		ctx: &ExecContext,
	) -> Result<i64, StoreError> {
		let id: i64 = sqlx::query_scalar(
			"INSERT INTO sync_record (model, id, locale, data, write_uid) \
			 VALUES ($1, COALESCE($2, nextval('sync_record_id_seq')), '', $3, $4) \
			 ON CONFLICT (model, id, locale) \
			 DO UPDATE SET data = sync_record.data || EXCLUDED.data, write_uid = EXCLUDED.write_uid \
			 RETURNING id",
		)
		.bind(model)
		.bind(id)
		.bind(Value::Object(values.clone()))
		.bind(ctx.identity.to_string())
		.fetch_one(&mut *self.tx)
		.await?;
		Ok(id)
	}

	async fn import_from_date(
		&mut self,
		backend_id: i64,
		field: &str,
	) -> Result<Option<DateTime<Utc>>, StoreError> {
		let at: Option<DateTime<Utc>> = sqlx::query_scalar(
			"SELECT from_date FROM sync_import_date WHERE backend_id = $1 AND field = $2",
		)
		.bind(backend_id)
		.bind(field)
		.fetch_optional(&mut *self.tx)
		.await?;
		Ok(at)
	}

	async fn set_import_from_date(
		&mut self,
		backend_id: i64,
		field: &str,
		at: DateTime<Utc>,
	) -> Result<(), StoreError> {
		sqlx::query(
			"INSERT INTO sync_import_date (backend_id, field, from_date) VALUES ($1, $2, $3) \
			 ON CONFLICT (backend_id, field) DO UPDATE SET from_date = EXCLUDED.from_date",
		)
		.bind(backend_id)
		.bind(field)
		.bind(at)
		.execute(&mut *self.tx)
		.await?;
		Ok(())
	}

	async fn commit(self: Box<Self>) -> Result<(), StoreError> {
		self.tx.commit().await?;
		Ok(())
	}

	async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
		self.tx.rollback().await?;
		Ok(())
	}
}
