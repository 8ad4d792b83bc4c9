use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::error::SyncError;
use crate::export::{ConnectorEnv, Exporter};
use crate::import::ImporterRegistry;
use crate::queue::{ChannelQueue, Envelope, Job};

/// Longest delay between two attempts of a job.
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// What happens to a job after one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
	Done(String),
	RetryLater { after: Duration, reason: String },
	Failed(String),
}

/// Exponential backoff for retryable results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
	pub max_retries: u32,
	pub base: Duration,
}

impl RetryPolicy {
	pub fn new(max_retries: u32, base: Duration) -> Self {
		Self { max_retries, base }
	}

	/// Delay before the attempt following `attempt` (0-based).
	pub fn delay(&self, attempt: u32) -> Duration {
		let factor = 2u32.saturating_pow(attempt);
		self.base.saturating_mul(factor).min(MAX_BACKOFF)
	}

	pub fn classify(&self, attempt: u32, result: Result<String, SyncError>) -> JobResult {
		match result {
			Ok(message) => JobResult::Done(message),
			Err(e) if e.is_retryable() && attempt < self.max_retries => JobResult::RetryLater {
				after: self.delay(attempt),
				reason: e.to_string(),
			},
			Err(e) if e.is_retryable() => {
				JobResult::Failed(format!("gave up after {} attempts: {}", attempt + 1, e))
			}
			Err(e) => JobResult::Failed(e.to_string()),
		}
	}
}

/// Runs one job against the engine.
pub struct Dispatcher {
	env: Arc<ConnectorEnv>,
	importers: Arc<ImporterRegistry>,
}

impl Dispatcher {
	pub fn new(env: Arc<ConnectorEnv>, importers: Arc<ImporterRegistry>) -> Self {
		Self { env, importers }
	}

	pub fn env(&self) -> &Arc<ConnectorEnv> {
		&self.env
	}

	/// Run `job` and return the outcome message.
	pub async fn perform(&self, job: &Job) -> Result<String, SyncError> {
		match job {
			Job::Export {
				model,
				binding_id,
				fields,
			} => {
				let exporter = Exporter::new(Arc::clone(&self.env), model)?;
				let outcome = exporter.run(*binding_id, fields.clone()).await?;
				Ok(outcome.to_string())
			}
			Job::Import {
				model,
				backend_id,
				remote_id,
				force,
				data,
			} => {
				if *backend_id != self.env.backend.id {
					return Err(SyncError::UnknownBackend(*backend_id));
				}
				let importer = self.importers.get(model)?;
				let outcome = importer
					.run(&self.env, remote_id, data.as_ref(), *force)
					.await
					.inspect_err(|_| self.env.metrics.import_errors_total.inc())?;
				Ok(outcome.to_string())
			}
		}
	}
}

/// Pool of tasks consuming the in-process queue.
pub struct WorkerPool {
	queue: ChannelQueue,
	handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
	/// Spawn `workers` tasks reading from `rx`. `queue` must be the sending side of
	/// `rx`; retries are put back through it.
	pub fn start(
		dispatcher: Arc<Dispatcher>,
		queue: ChannelQueue,
		rx: Receiver<Envelope>,
		policy: RetryPolicy,
		workers: usize,
	) -> Self {
		let rx = Arc::new(Mutex::new(rx));
		let handles = (0..workers.max(1))
			.map(|n| {
				let dispatcher = Arc::clone(&dispatcher);
				let queue = queue.clone();
				let rx = Arc::clone(&rx);
				tokio::spawn(async move {
					loop {
						let next = rx.lock().await.recv().await;
						let Some(envelope) = next else {
							break;
						};
						handle(&dispatcher, &queue, policy, envelope).await;
					}
					log::debug!("worker {} stopped", n);
				})
			})
			.collect();
		Self { queue, handles }
	}

	pub fn queue(&self) -> &ChannelQueue {
		&self.queue
	}

	/// Wait until every enqueued job has completed or failed.
	pub async fn wait_idle(&self) {
		self.queue.wait_idle().await;
	}

	/// Stop the workers. Jobs still queued are dropped.
	pub async fn shutdown(self) {
		for handle in &self.handles {
			handle.abort();
		}
		for handle in self.handles {
			let _ = handle.await;
		}
	}
}

async fn handle(dispatcher: &Dispatcher, queue: &ChannelQueue, policy: RetryPolicy, envelope: Envelope) {
	let metrics = Arc::clone(&dispatcher.env().metrics);
	if envelope.attempt == 0 {
		metrics.jobs_submitted_total.inc();
	}

	let start = Instant::now();
	let result = dispatcher.perform(&envelope.job).await;
	metrics
		.job_latency_ms
		.observe(start.elapsed().as_millis() as f64);

	match policy.classify(envelope.attempt, result) {
		JobResult::Done(message) => {
			info!("{}: {}", envelope.job, message);
			metrics.jobs_completed_total.inc();
			queue.settle();
		}
		JobResult::RetryLater { after, reason } => {
			info!(
				"{} (attempt {}) will be retried in {:?}: {}",
				envelope.job,
				envelope.attempt + 1,
				after,
				reason
			);
			metrics.jobs_retried_total.inc();
			let queue = queue.clone();
			let next = Envelope {
				job: envelope.job,
				attempt: envelope.attempt + 1,
			};
			tokio::spawn(async move {
				tokio::time::sleep(after).await;
				let job = next.job.to_string();
				if let Err(e) = queue.requeue(next).await {
					warn!("could not requeue {}: {}", job, e);
					queue.settle();
				}
			});
		}
		JobResult::Failed(reason) => {
			error!("{} failed: {}", envelope.job, reason);
			metrics.jobs_failed_total.inc();
			queue.settle();
		}
	}
	metrics.jobs_pending.set(queue.pending() as i64);
}
