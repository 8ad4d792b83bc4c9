use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::watch;

use crate::binding::BindingId;
use crate::mapper::FieldSet;

/// A unit of work for the job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
	/// Push one binding to the backend.
	Export {
		model: String,
		binding_id: BindingId,
		#[serde(default)]
		fields: Option<FieldSet>,
	},
	/// Pull one remote record. `force` bypasses the importer's own staleness guard.
	Import {
		model: String,
		backend_id: i64,
		remote_id: String,
		#[serde(default)]
		force: bool,
		/// Record data already known to the caller (batch imports).
		#[serde(default)]
		data: Option<Value>,
	},
}

impl Job {
	pub fn model(&self) -> &str {
		match self {
			Job::Export { model, .. } | Job::Import { model, .. } => model,
		}
	}
}

impl fmt::Display for Job {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Job::Export {
				model, binding_id, ..
			} => write!(f, "export {} #{}", model, binding_id),
			Job::Import {
				model, remote_id, ..
			} => write!(f, "import {} {}", model, remote_id),
		}
	}
}

/// A job together with the number of times it was already attempted.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
	pub job: Job,
	pub attempt: u32,
}

#[derive(Debug, Error)]
pub enum QueueError {
	#[error("job queue is closed")]
	Closed,
}

/// Enqueue side of the job queue.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
	async fn enqueue(&self, job: Job) -> Result<(), QueueError>;
}

/// In-process queue feeding the worker pool.
///
/// Counts the jobs that were enqueued and have not settled yet, retries included, so
/// callers can wait for the pool to go idle.
#[derive(Clone)]
pub struct ChannelQueue {
	tx: Sender<Envelope>,
	pending: Arc<watch::Sender<usize>>,
}

impl ChannelQueue {
	pub fn new(capacity: usize) -> (Self, Receiver<Envelope>) {
		let (tx, rx) = mpsc::channel(capacity);
		let (pending, _) = watch::channel(0);
		(
			Self {
				tx,
				pending: Arc::new(pending),
			},
			rx,
		)
	}

	/// Put a job back for another attempt. The job stays pending.
	pub async fn requeue(&self, envelope: Envelope) -> Result<(), QueueError> {
		self.tx
			.send(envelope)
			.await
			.map_err(|_| QueueError::Closed)
	}

	/// Mark one job as finished for good.
	pub fn settle(&self) {
		self.pending.send_modify(|n| *n = n.saturating_sub(1));
	}

	pub fn pending(&self) -> usize {
		*self.pending.borrow()
	}

	/// Wait until every enqueued job has settled.
	pub async fn wait_idle(&self) {
		let mut rx = self.pending.subscribe();
		let _ = rx.wait_for(|n| *n == 0).await.map(|_| ());
	}
}

#[async_trait]
impl JobQueue for ChannelQueue {
	async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
		self.pending.send_modify(|n| *n += 1);
		let sent = self.tx.send(Envelope { job, attempt: 0 }).await;
		if sent.is_err() {
			self.settle();
			return Err(QueueError::Closed);
		}
		Ok(())
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn jobs_deserialize_from_ndjson_lines() {
		let export: Job =
			serde_json::from_str(r#"{"type":"export","model":"magento.product.product","binding_id":4}"#)
				.unwrap();
		assert_eq!(
			export,
			Job::Export {
				model: "magento.product.product".into(),
				binding_id: 4,
				fields: None,
			}
		);

		let import: Job = serde_json::from_str(
			r#"{"type":"import","model":"magento.product.product","backend_id":1,"remote_id":"77","force":true}"#,
		)
		.unwrap();
		assert!(matches!(import, Job::Import { force: true, .. }));
		assert_eq!(import.to_string(), "import magento.product.product 77");
	}

	#[tokio::test]
	async fn channel_queue_delivers_fresh_envelopes() {
		let (queue, mut rx) = ChannelQueue::new(4);
		queue
			.enqueue(Job::Export {
				model: "m".into(),
				binding_id: 1,
				fields: None,
			})
			.await
			.unwrap();
		let env = rx.recv().await.unwrap();
		assert_eq!(env.attempt, 0);
		assert_eq!(env.job.model(), "m");
		assert_eq!(queue.pending(), 1);

		queue
			.requeue(Envelope {
				attempt: 1,
				..env
			})
			.await
			.unwrap();
		assert_eq!(queue.pending(), 1);
		assert_eq!(rx.recv().await.unwrap().attempt, 1);

		queue.settle();
		queue.wait_idle().await;
		assert_eq!(queue.pending(), 0);
	}

	#[tokio::test]
	async fn enqueue_on_closed_queue_fails() {
		let (queue, rx) = ChannelQueue::new(1);
		drop(rx);
		let err = queue
			.enqueue(Job::Export {
				model: "m".into(),
				binding_id: 1,
				fields: None,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, QueueError::Closed));
		assert_eq!(queue.pending(), 0);
	}
}
