use catalog_relay::observability::{MetricsRegistry, init_metrics};

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_registry_creation() {
	let registry = MetricsRegistry::new().unwrap();
	let output = registry.encode();

	assert!(output.contains("relay_export_lock_contention_total"));
	assert!(output.contains("relay_dependency_bindings_created_total"));
	assert!(output.contains("relay_imports_scheduled_total"));
	assert!(output.contains("relay_batch_imports_scheduled_total"));
	assert!(output.contains("relay_translation_writes_total"));
	assert!(output.contains("relay_jobs_submitted_total"));
	assert!(output.contains("relay_jobs_pending"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_increment() {
	let registry = MetricsRegistry::new().unwrap();

	registry.export_lock_contention_total.inc();
	registry.import_records_total.inc_by(5);
	registry.jobs_retried_total.inc_by(10);
	registry.export_outcome("noop");

	let output = registry.encode();

	assert!(output.contains("relay_export_lock_contention_total 1"));
	assert!(output.contains("relay_import_records_total 5"));
	assert!(output.contains("relay_jobs_retried_total 10"));
	assert!(output.contains("relay_export_outcomes_total{outcome=\"noop\"} 1"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_gauge_operations() {
	let registry = MetricsRegistry::new().unwrap();

	registry.jobs_pending.set(50);
	registry.jobs_pending.inc();
	registry.jobs_pending.dec();

	assert!(registry.encode().contains("relay_jobs_pending 50"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_histogram_observations() {
	let registry = MetricsRegistry::new().unwrap();

	registry.export_duration_seconds.observe(0.1);
	registry.export_duration_seconds.observe(0.5);
	registry.export_duration_seconds.observe(1.2);

	let output = registry.encode();

	// Histograms generate multiple series (buckets, sum, count)
	assert!(output.contains("relay_export_duration_seconds_bucket"));
	assert!(output.contains("relay_export_duration_seconds_sum"));
	assert!(output.contains("relay_export_duration_seconds_count 3"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_init_metrics() {
	let metrics = init_metrics().unwrap();
	assert!(!metrics.encode().is_empty());
}
