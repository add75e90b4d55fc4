use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, info};
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;

use super::{RemoteSource, file_name_of};
use crate::error::IngestError;
use crate::observability::MetricsRegistry;

/// Downloads remote sources into a local cache keyed by service type.
///
/// A file already present in the cache is reused without any request; the
/// cache is never invalidated automatically.
pub struct Fetcher {
	client: reqwest::Client,
	cache_dir: PathBuf,
	metrics: Arc<MetricsRegistry>,
}

impl Fetcher {
	pub fn new(cache_dir: impl Into<PathBuf>, metrics: Arc<MetricsRegistry>) -> Self {
		Self {
			client: reqwest::Client::new(),
			cache_dir: cache_dir.into(),
			metrics,
		}
	}

	/// `{cache_dir}/{service_type}/{file name}`; sources of unknown service
	/// type go under `other/`.
	pub fn cache_path(&self, source: &RemoteSource) -> Result<PathBuf, IngestError> {
		let name = file_name_of(source.url.path()).ok_or_else(|| {
			IngestError::Configuration(format!("URL '{}' does not name a file", source.url))
		})?;
		let bucket = source.service.map(|s| s.as_str()).unwrap_or("other");
		Ok(self.cache_dir.join(bucket).join(name))
	}

	/// Return a local path holding the contents of `source`, downloading it
	/// first unless it is already cached.
	pub async fn fetch(&self, source: &RemoteSource) -> Result<PathBuf, IngestError> {
		let path = self.cache_path(source)?;
		if path.is_file() {
			info!("Using cached file {}", path.display());
			self.metrics.cache_hits_total.inc();
			return Ok(path);
		}

		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| IngestError::io(parent, e))?;
		}

		info!("Downloading {} -> {}", source.url, path.display());
		let bytes = self.download(source, &path).await?;
		debug!("Downloaded {} bytes from {}", bytes, source.url);
		self.metrics.download_bytes_total.inc_by(bytes);
		Ok(path)
	}

	async fn download(&self, source: &RemoteSource, dest: &Path) -> Result<u64, IngestError> {
		let transfer = |message: String| IngestError::Transfer {
			url: source.url.to_string(),
			message,
		};

		let resp = self
			.client
			.get(source.url.clone())
			.send()
			.await
			.map_err(|e| transfer(e.to_string()))?;
		let status = resp.status();
		if !status.is_success() {
			return Err(transfer(format!("server responded with {}", status)));
		}

		// Stream into a side file so an interrupted download never looks cached.
		let mut part = dest.as_os_str().to_owned();
		part.push(".part");
		let part = PathBuf::from(part);

		let mut file = TokioFile::create(&part)
			.await
			.map_err(|e| IngestError::io(&part, e))?;
		let mut written: u64 = 0;
		let mut body = resp.bytes_stream();
		while let Some(chunk) = body.next().await {
			let chunk = match chunk {
				Ok(c) => c,
				Err(e) => {
					let _ = tokio::fs::remove_file(&part).await;
					return Err(transfer(e.to_string()));
				}
			};
			file.write_all(&chunk)
				.await
				.map_err(|e| IngestError::io(&part, e))?;
			written += chunk.len() as u64;
		}
		file.flush().await.map_err(|e| IngestError::io(&part, e))?;
		drop(file);

		tokio::fs::rename(&part, dest)
			.await
			.map_err(|e| IngestError::io(dest, e))?;
		Ok(written)
	}
}
