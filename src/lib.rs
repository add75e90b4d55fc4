pub mod config;
pub mod error;
pub mod ingest;
pub mod observability;
pub mod pipeline;
pub mod source;
pub mod store;

use std::sync::Arc;

use log::info;

use crate::config::{Settings, Target};
use crate::error::IngestError;
use crate::observability::MetricsRegistry;
use crate::pipeline::{Pipeline, PipelineOptions, RunSummary};
use crate::source::{Fetcher, SourceRequest};
use crate::store::{Loader, ParquetStore, PgStore, TableStore};

/// Resolve the request, open the configured store and ingest every location.
///
/// Sources are resolved before the store is touched, so a request that
/// matches nothing never opens a connection.
pub async fn run(
	settings: &Settings,
	request: &SourceRequest,
	metrics: Arc<MetricsRegistry>,
) -> Result<RunSummary, IngestError> {
	settings.validate()?;
	let locations = source::resolve(request)?;
	info!("Resolved {} location(s)", locations.len());

	let store: Arc<dyn TableStore> = match settings.target {
		Target::Postgres => {
			let url = settings.database_url()?;
			let target = settings.redacted_target();
			info!("Connecting to Postgres at {}", target);
			let store = PgStore::connect(url.as_str(), &target).await?;
			store.ping().await?;
			Arc::new(store)
		}
		Target::Parquet => {
			info!("Writing Parquet tables under {}", settings.out_dir.display());
			Arc::new(ParquetStore::new(&settings.out_dir))
		}
	};

	run_with_store(settings, &locations, store, metrics).await
}

/// Ingest already resolved locations into `store`.
pub async fn run_with_store(
	settings: &Settings,
	locations: &[source::InputLocation],
	store: Arc<dyn TableStore>,
	metrics: Arc<MetricsRegistry>,
) -> Result<RunSummary, IngestError> {
	let pipeline = Pipeline::new(
		Fetcher::new(&settings.cache_dir, metrics.clone()),
		Loader::new(store, settings.if_exists, metrics.clone()),
		PipelineOptions::from_settings(settings),
		metrics,
	);
	pipeline.run(locations).await
}
