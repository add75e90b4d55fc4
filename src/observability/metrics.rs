use std::path::Path;
use std::sync::Arc;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};

/// Counters for one ingestion run, exposed in Prometheus text format.
pub struct MetricsRegistry {
	registry: Registry,

	// Source metrics
	pub locations_total: IntCounter,
	pub locations_empty_total: IntCounter,
	pub download_bytes_total: IntCounter,
	pub cache_hits_total: IntCounter,

	// Load metrics
	pub batches_total: IntCounter,
	pub rows_total: IntCounter,
	pub tables_created_total: IntCounter,
	pub batch_write_seconds: Histogram,

	pub errors_total: IntCounter,
}

fn counter(name: &str, help: &str) -> prometheus::Result<IntCounter> {
	IntCounter::with_opts(Opts::new(name, help).namespace("tlc_ingest"))
}

impl MetricsRegistry {
	pub fn new() -> prometheus::Result<Self> {
		let registry = Registry::new();

		let locations_total = counter("locations_total", "Input locations processed")?;
		let locations_empty_total = counter(
			"locations_empty_total",
			"Input locations that yielded no rows",
		)?;
		let download_bytes_total =
			counter("download_bytes_total", "Bytes downloaded from remote sources")?;
		let cache_hits_total = counter(
			"cache_hits_total",
			"Remote sources served from the local cache",
		)?;
		let batches_total = counter("batches_total", "Row batches written")?;
		let rows_total = counter("rows_total", "Rows written to the destination")?;
		let tables_created_total = counter(
			"tables_created_total",
			"Destination tables created or replaced",
		)?;
		let errors_total = counter("errors_total", "Runs aborted by an error")?;

		let batch_write_seconds = Histogram::with_opts(
			HistogramOpts::new("batch_write_seconds", "Duration of one batch write in seconds")
				.namespace("tlc_ingest")
				.buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
		)?;

		registry.register(Box::new(locations_total.clone()))?;
		registry.register(Box::new(locations_empty_total.clone()))?;
		registry.register(Box::new(download_bytes_total.clone()))?;
		registry.register(Box::new(cache_hits_total.clone()))?;
		registry.register(Box::new(batches_total.clone()))?;
		registry.register(Box::new(rows_total.clone()))?;
		registry.register(Box::new(tables_created_total.clone()))?;
		registry.register(Box::new(batch_write_seconds.clone()))?;
		registry.register(Box::new(errors_total.clone()))?;

		Ok(Self {
			registry,
			locations_total,
			locations_empty_total,
			download_bytes_total,
			cache_hits_total,
			batches_total,
			rows_total,
			tables_created_total,
			batch_write_seconds,
			errors_total,
		})
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::warn!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}

	/// Write the text exposition to `path`, replacing any previous file.
	pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
		std::fs::write(path, self.encode())
	}
}

pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::new()?))
}
