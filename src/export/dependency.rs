use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use serde_json::{Map, Value};

use super::environment::ConnectorEnv;
use super::exporter::Exporter;
use super::flow::ExportFlow;
use super::guard::retry_unique_violation;
use crate::binding::{BindingId, NewBinding, Relation};
use crate::error::SyncError;

/// Bindings currently being exported up the call chain, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trail {
	path: Vec<(String, BindingId)>,
}

impl Trail {
	/// Trail extended with `(model, id)`. Fails when the binding is already being
	/// exported further up, or when the chain would exceed `max_depth`.
	pub fn enter(&self, model: &str, id: BindingId, max_depth: usize) -> Result<Trail, SyncError> {
		let mut next = self.clone();
		next.path.push((model.to_string(), id));
		if self.path.iter().any(|(m, i)| m == model && *i == id) {
			return Err(SyncError::DependencyCycle(next.to_string()));
		}
		if next.path.len() > max_depth {
			return Err(SyncError::DependencyCycle(format!(
				"dependency chain deeper than {}: {}",
				max_depth, next
			)));
		}
		Ok(next)
	}

	pub fn depth(&self) -> usize {
		self.path.len()
	}
}

impl fmt::Display for Trail {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, (model, id)) in self.path.iter().enumerate() {
			if i > 0 {
				f.write_str(" -> ")?;
			}
			write!(f, "{} #{}", model, id)?;
		}
		Ok(())
	}
}

/// Handed to [`ExportFlow::export_dependencies`] to export the records the current
/// one refers to.
pub struct DependencyResolver {
	env: Arc<ConnectorEnv>,
	trail: Trail,
}

impl DependencyResolver {
	pub(crate) fn new(env: Arc<ConnectorEnv>, trail: Trail) -> Self {
		Self { env, trail }
	}

	pub fn env(&self) -> &ConnectorEnv {
		&self.env
	}

	/// Make sure `relation` exists on the backend as a `binding_model` binding and
	/// return that binding's id.
	///
	/// `relation` is either a binding of `binding_model` itself or a record of the
	/// model it wraps. In the second case a missing binding is created and committed
	/// in its own session, under an elevated context, so concurrent jobs see it at
	/// once. A binding without remote id is exported right away with `flow`, or with
	/// the flow registered for `binding_model`. `extra` is stored on created bindings.
	pub async fn export_dependency(
		&self,
		relation: &Relation,
		binding_model: &str,
		flow: Option<Arc<dyn ExportFlow>>,
		extra: Option<Map<String, Value>>,
	) -> Result<BindingId, SyncError> {
		let units = self.env.units(binding_model)?;

		let binding_id = if relation.model == binding_model {
			relation.id
		} else if relation.model == units.record_model {
			self.ensure_binding(binding_model, relation.id, extra).await?
		} else {
			return Err(SyncError::Mapping(format!(
				"{} #{} cannot be exported as {}",
				relation.model, relation.id, binding_model
			)));
		};

		let mut session = self.env.store.begin().await?;
		let binding = session.binding(binding_model, binding_id).await?;
		session.rollback().await?;
		let binding = binding.ok_or_else(|| SyncError::MissingBinding {
			model: binding_model.to_string(),
			id: binding_id,
		})?;

		if binding.remote_id.is_none() {
			debug!(
				"exporting dependency {} #{} (depth {})",
				binding_model,
				binding_id,
				self.trail.depth()
			);
			let mut exporter =
				Exporter::new(Arc::clone(&self.env), binding_model)?.with_trail(self.trail.clone());
			if let Some(flow) = flow {
				exporter = exporter.with_flow(flow);
			}
			exporter.run(binding_id, None).await?;
		}
		Ok(binding_id)
	}

	async fn ensure_binding(
		&self,
		binding_model: &str,
		record_id: i64,
		extra: Option<Map<String, Value>>,
	) -> Result<BindingId, SyncError> {
		let backend_id = self.env.backend.id;
		let mut session = self.env.store.begin().await?;
		if let Some(existing) = session
			.find_binding(binding_model, record_id, backend_id)
			.await?
		{
			session.rollback().await?;
			return Ok(existing.id);
		}

		let ctx = self.env.ctx.elevated();
		let new = NewBinding::new(record_id, backend_id).with_extra(extra.unwrap_or_default());
		let id = retry_unique_violation(async move {
			let id = session.create_binding(binding_model, &new, &ctx).await?;
			session.commit().await?;
			Ok(id)
		})
		.await?;

		self.env.metrics.dependency_bindings_created_total.inc();
		info!(
			"created {} binding #{} for record {} on backend {}",
			binding_model, id, record_id, backend_id
		);
		Ok(id)
	}
}
