pub mod http;

pub use http::HttpAdapter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::binding::{Payload, Record};

#[derive(Debug, Error)]
pub enum BackendError {
	/// The remote id no longer resolves on the backend (deleted upstream).
	#[error("record {0} does not exist on the backend")]
	IdMissing(String),

	#[error("backend rejected the request ({status}): {body}")]
	Rejected { status: u16, body: String },

	#[error("backend request failed: {0}")]
	Transport(String),

	#[error("unexpected backend response: {0}")]
	InvalidResponse(String),
}

impl From<reqwest::Error> for BackendError {
	fn from(err: reqwest::Error) -> Self {
		BackendError::Transport(err.to_string())
	}
}

/// Selection of remote records for batch imports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
	/// Updated at or after this instant. Unset selects every record.
	pub updated_from: Option<DateTime<Utc>>,
	/// Updated strictly before this instant.
	pub updated_to: Option<DateTime<Utc>>,
	/// Backend product type, e.g. `configurable`.
	pub type_id: Option<String>,
}

/// Read/create/write operations on one remote resource type.
#[async_trait]
pub trait BackendAdapter: Send + Sync + 'static {
	/// Read the listed attributes of a remote record.
	async fn read(&self, remote_id: &str, attributes: &[&str]) -> Result<Record, BackendError>;

	/// Create a remote record and return its remote id.
	async fn create(&self, data: &Payload) -> Result<String, BackendError>;

	/// Remote ids of the records matching `filter`.
	async fn search(&self, filter: &SearchFilter) -> Result<Vec<String>, BackendError>;

	/// Update a remote record, optionally scoped to a storeview.
	async fn write(
		&self,
		remote_id: &str,
		data: &Payload,
		storeview: Option<&str>,
	) -> Result<(), BackendError>;
}
