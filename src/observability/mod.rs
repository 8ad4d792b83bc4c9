pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{MetricsRegistry, init_metrics};

use std::sync::Arc;

use log::LevelFilter;

/// Global observability state
pub struct ObservabilityState {
	pub metrics: Arc<MetricsRegistry>,
}

/// Initialize logging and the metrics registry
pub fn init_observability(level: LevelFilter) -> anyhow::Result<ObservabilityState> {
	init_logging(level)?;
	let metrics = init_metrics()?;

	log::debug!("observability initialized: logging at {}, metrics registry ready", level);

	Ok(ObservabilityState { metrics })
}
