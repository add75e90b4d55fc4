pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{MetricsRegistry, init_metrics};

use std::sync::Arc;

use log::LevelFilter;

/// Initialize logging and the metrics registry for one run.
pub fn init_observability(level: LevelFilter) -> anyhow::Result<Arc<MetricsRegistry>> {
	init_logging(level)?;
	let metrics = init_metrics()?;

	log::debug!("Observability initialized: logging at {}, metrics registry ready", level);

	Ok(metrics)
}
