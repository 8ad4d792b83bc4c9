use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity under which store operations run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
	/// A named job runner or operator.
	User(String),
	/// Elevated system identity. Only handed out through [`ExecContext::elevated`].
	System,
}

impl fmt::Display for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Identity::User(name) => f.write_str(name),
			Identity::System => f.write_str("__system__"),
		}
	}
}

/// Explicit execution context threaded through every store call that needs to know
/// who is acting, in which language records are read, and whether change hooks fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecContext {
	pub identity: Identity,
	/// Active language for translatable fields. `None` reads the untranslated values.
	pub locale: Option<String>,
	/// When set, stores must not trigger export hooks for writes made in this context.
	pub no_export: bool,
}

impl ExecContext {
	pub fn new(identity: Identity) -> Self {
		Self {
			identity,
			locale: None,
			no_export: false,
		}
	}

	/// Context for a worker identified by `name`.
	pub fn worker(name: impl Into<String>) -> Self {
		Self::new(Identity::User(name.into()))
	}

	/// Same context with the active locale replaced.
	pub fn with_locale(&self, locale: Option<String>) -> Self {
		Self {
			locale,
			..self.clone()
		}
	}

	/// System identity with export hooks suppressed, used when the engine creates
	/// bindings on behalf of a dependency. The locale is kept.
	pub fn elevated(&self) -> Self {
		Self {
			identity: Identity::System,
			locale: self.locale.clone(),
			no_export: true,
		}
	}

	/// Same identity with export hooks suppressed. Imports write under this context so
	/// pulled changes are not pushed straight back.
	pub fn without_export(&self) -> Self {
		Self {
			no_export: true,
			..self.clone()
		}
	}

	pub fn is_elevated(&self) -> bool {
		self.identity == Identity::System
	}
}
