use prometheus::{
	Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

const NAMESPACE: &str = "relay";

/// Central registry for all Prometheus metrics
pub struct MetricsRegistry {
	registry: Registry,

	// Export metrics
	/// Export runs by outcome: created, updated, noop, skipped, retry, failed.
	pub export_outcomes_total: IntCounterVec,
	pub export_duration_seconds: Histogram,
	pub export_lock_contention_total: IntCounter,
	pub dependency_bindings_created_total: IntCounter,
	pub imports_scheduled_total: IntCounter,
	pub translation_writes_total: IntCounter,
	pub translation_failures_total: IntCounter,

	// Import metrics
	pub import_records_total: IntCounter,
	pub import_errors_total: IntCounter,
	pub batch_imports_scheduled_total: IntCounter,

	// Worker metrics
	pub jobs_submitted_total: IntCounter,
	pub jobs_completed_total: IntCounter,
	pub jobs_retried_total: IntCounter,
	pub jobs_failed_total: IntCounter,
	pub jobs_pending: IntGauge,
	pub job_latency_ms: Histogram,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
	IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))
}

fn histogram(name: &str, help: &str, buckets: Vec<f64>) -> Result<Histogram, prometheus::Error> {
	Histogram::with_opts(
		HistogramOpts::new(name, help)
			.namespace(NAMESPACE)
			.buckets(buckets),
	)
}

impl MetricsRegistry {
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Registry::new();

		// Export metrics
		let export_outcomes_total = IntCounterVec::new(
			Opts::new("export_outcomes_total", "Export runs by outcome").namespace(NAMESPACE),
			&["outcome"],
		)?;
		let export_duration_seconds = histogram(
			"export_duration_seconds",
			"Duration of export runs in seconds, dependencies included",
			vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0],
		)?;
		let export_lock_contention_total = counter(
			"export_lock_contention_total",
			"Exports deferred because another job held the binding lock",
		)?;
		let dependency_bindings_created_total = counter(
			"dependency_bindings_created_total",
			"Bindings created on the fly for dependencies",
		)?;
		let imports_scheduled_total = counter(
			"imports_scheduled_total",
			"Imports scheduled because the remote record changed since the last sync",
		)?;
		let translation_writes_total = counter(
			"translation_writes_total",
			"Storeview writes of translated values",
		)?;
		let translation_failures_total = counter(
			"translation_failures_total",
			"Storeviews that failed to receive translated values",
		)?;

		// Import metrics
		let import_records_total = counter("import_records_total", "Records imported")?;
		let import_errors_total = counter("import_errors_total", "Failed imports")?;
		let batch_imports_scheduled_total = counter(
			"batch_imports_scheduled_total",
			"Record imports scheduled by from-date batch imports",
		)?;

		// Worker metrics
		let jobs_submitted_total = counter("jobs_submitted_total", "Jobs received by the worker pool")?;
		let jobs_completed_total = counter("jobs_completed_total", "Jobs that completed")?;
		let jobs_retried_total = counter("jobs_retried_total", "Job attempts rescheduled")?;
		let jobs_failed_total = counter("jobs_failed_total", "Jobs that failed for good")?;
		let jobs_pending = IntGauge::with_opts(
			Opts::new("jobs_pending", "Jobs enqueued and not settled yet, retries included").namespace(NAMESPACE),
		)?;
		let job_latency_ms = histogram(
			"job_latency_ms",
			"Job run latency in milliseconds",
			vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0],
		)?;

		// Register all metrics
		registry.register(Box::new(export_outcomes_total.clone()))?;
		registry.register(Box::new(export_duration_seconds.clone()))?;
		registry.register(Box::new(export_lock_contention_total.clone()))?;
		registry.register(Box::new(dependency_bindings_created_total.clone()))?;
		registry.register(Box::new(imports_scheduled_total.clone()))?;
		registry.register(Box::new(translation_writes_total.clone()))?;
		registry.register(Box::new(translation_failures_total.clone()))?;
		registry.register(Box::new(import_records_total.clone()))?;
		registry.register(Box::new(import_errors_total.clone()))?;
		registry.register(Box::new(batch_imports_scheduled_total.clone()))?;
		registry.register(Box::new(jobs_submitted_total.clone()))?;
		registry.register(Box::new(jobs_completed_total.clone()))?;
		registry.register(Box::new(jobs_retried_total.clone()))?;
		registry.register(Box::new(jobs_failed_total.clone()))?;
		registry.register(Box::new(jobs_pending.clone()))?;
		registry.register(Box::new(job_latency_ms.clone()))?;

		Ok(Self {
			registry,
			export_outcomes_total,
			export_duration_seconds,
			export_lock_contention_total,
			dependency_bindings_created_total,
			imports_scheduled_total,
			translation_writes_total,
			translation_failures_total,
			import_records_total,
			import_errors_total,
			batch_imports_scheduled_total,
			jobs_submitted_total,
			jobs_completed_total,
			jobs_retried_total,
			jobs_failed_total,
			jobs_pending,
			job_latency_ms,
		})
	}

	/// Count one export run under `outcome`.
	pub fn export_outcome(&self, outcome: &str) {
		self.export_outcomes_total
			.with_label_values(&[outcome])
			.inc();
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::error!("failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

/// Initialize the metrics registry shared by the engine and the worker pool
pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::new()?))
}
