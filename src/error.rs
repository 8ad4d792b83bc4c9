use std::fmt;

use thiserror::Error;

use crate::backend::BackendError;
use crate::binding::BindingId;
use crate::export::ExportOutcome;
use crate::queue::QueueError;
use crate::store::StoreError;

/// Errors surfaced by export and import runs.
///
/// Only [`SyncError::Retryable`] asks the job queue to run the job again later. Every
/// other variant fails the job and keeps the original detail for the report.
#[derive(Debug, Error)]
pub enum SyncError {
	/// Transient condition caused by a concurrent job. Safe to run again.
	#[error("{0}")]
	Retryable(String),

	/// The payload failed validation; nothing was sent to the backend.
	#[error("invalid data: {0}")]
	InvalidData(String),

	/// A reference required by the mapping could not be resolved.
	#[error("mapping error: {0}")]
	Mapping(String),

	#[error("dependency cycle detected: {0}")]
	DependencyCycle(String),

	#[error("{model} binding {id} does not exist")]
	MissingBinding { model: String, id: BindingId },

	#[error("no synchronization units registered for model '{0}'")]
	UnknownModel(String),

	#[error("backend {0} does not exist")]
	UnknownBackend(i64),

	/// The primary export committed but some storeviews could not be updated.
	#[error(
		"translation export failed for {} storeview(s) after {exported}: {}",
		.failures.len(),
		join_failures(.failures)
	)]
	Translation {
		exported: ExportOutcome,
		failures: Vec<StoreviewFailure>,
	},

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Backend(#[from] BackendError),

	#[error(transparent)]
	Queue(#[from] QueueError),
}

impl SyncError {
	pub fn is_retryable(&self) -> bool {
		matches!(self, SyncError::Retryable(_))
	}
}

/// One storeview that could not receive its translated values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreviewFailure {
	pub storeview: String,
	pub error: String,
}

impl fmt::Display for StoreviewFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.storeview, self.error)
	}
}

fn join_failures(failures: &[StoreviewFailure]) -> String {
	failures
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join("; ")
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn only_retryable_variant_is_retryable() {
		assert!(SyncError::Retryable("busy".into()).is_retryable());
		assert!(!SyncError::InvalidData("sku".into()).is_retryable());
		assert!(!SyncError::Mapping("product".into()).is_retryable());
		assert!(!SyncError::Store(StoreError::UniqueViolation("dup".into())).is_retryable());
	}

	#[test]
	fn translation_error_lists_failed_storeviews() {
		let err = SyncError::Translation {
			exported: ExportOutcome::Updated("42".into()),
			failures: vec![
				StoreviewFailure {
					storeview: "fr".into(),
					error: "timeout".into(),
				},
				StoreviewFailure {
					storeview: "de".into(),
					error: "rejected".into(),
				},
			],
		};

		let text = err.to_string();
		assert!(text.contains("2 storeview(s)"));
		assert!(text.contains("fr: timeout; de: rejected"));
	}
}
