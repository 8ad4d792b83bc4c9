//! Export of local records to the backend.
//!
//! [`Exporter::run`] drives one binding through staleness check, dependency export,
//! row lock, mapping, create-or-update, bind and commit. Dependencies are resolved by
//! [`DependencyResolver`], which may recurse into another `Exporter`. Flows that
//! enable it have their translatable fields pushed to every other-language storeview
//! once the primary export is committed.

pub mod dependency;
pub mod environment;
pub mod exporter;
pub mod flow;
pub mod guard;
pub mod staleness;
pub mod translation;

pub use dependency::{DependencyResolver, Trail};
pub use environment::{ConnectorEnv, ModelUnits};
pub use exporter::Exporter;
pub use flow::{DefaultFlow, DependencyRule, ExportFlow, StandardFlow};
pub use guard::retry_unique_violation;
pub use translation::TranslationReport;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of one export run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "remote_id", rename_all = "snake_case")]
pub enum ExportOutcome {
	Created(String),
	Updated(String),
	/// The mapped payload was empty; nothing was sent.
	NoOp,
	/// The flow decided not to export this record.
	Skipped,
}

impl ExportOutcome {
	pub fn remote_id(&self) -> Option<&str> {
		match self {
			ExportOutcome::Created(id) | ExportOutcome::Updated(id) => Some(id),
			ExportOutcome::NoOp | ExportOutcome::Skipped => None,
		}
	}

	/// True when the backend received a create or a write.
	pub fn is_exported(&self) -> bool {
		self.remote_id().is_some()
	}
}

impl fmt::Display for ExportOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ExportOutcome::Created(id) | ExportOutcome::Updated(id) => {
				write!(f, "Record exported with ID {} on the backend.", id)
			}
			ExportOutcome::NoOp => f.write_str("Nothing to export."),
			ExportOutcome::Skipped => f.write_str("Export skipped."),
		}
	}
}
