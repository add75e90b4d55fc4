pub mod fetch;
pub mod remote;

use std::fmt;
use std::path::{Path, PathBuf};

use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::IngestError;
use remote::{Feed, MonthRef, ServiceType};

pub use fetch::Fetcher;

static SERVICE_PREFIX: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"(?i)^(yellow|green|fhvhv|fhv)_tripdata_").expect("static regex is valid")
});

/// A remote file, with the service type it belongs to when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSource {
	pub url: Url,
	pub service: Option<ServiceType>,
}

/// One concrete file to ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLocation {
	Local(PathBuf),
	Remote(RemoteSource),
}

impl InputLocation {
	/// The service type this location carries, either explicitly (remote
	/// year/month requests) or from a `{service}_tripdata_` file-name prefix.
	pub fn service_type(&self) -> Option<ServiceType> {
		match self {
			InputLocation::Remote(r) => r.service.or_else(|| service_from_name(r.url.path())),
			InputLocation::Local(p) => p
				.file_name()
				.and_then(|n| n.to_str())
				.and_then(service_from_name),
		}
	}
}

impl fmt::Display for InputLocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			InputLocation::Local(p) => write!(f, "{}", p.display()),
			InputLocation::Remote(r) => write!(f, "{}", r.url),
		}
	}
}

fn service_from_name(name: &str) -> Option<ServiceType> {
	let base = name.rsplit('/').next().unwrap_or(name);
	SERVICE_PREFIX
		.captures(base)
		.and_then(|c| c.get(1))
		.and_then(|m| m.as_str().parse().ok())
}

/// What the caller asked to ingest.
#[derive(Debug, Clone)]
pub enum SourceRequest {
	/// Local paths or glob patterns.
	Patterns(Vec<String>),
	/// One explicit URL.
	Url(Url),
	/// Every (service, month) pair from the fixed templates, service-major.
	Months {
		feed: Feed,
		services: Vec<ServiceType>,
		start: MonthRef,
		end: MonthRef,
	},
}

/// Source selection as given on the command line.
#[derive(Debug, Clone)]
pub struct SourceOptions {
	pub files: Vec<String>,
	pub url: Option<String>,
	pub year: Option<i32>,
	pub month: Option<u32>,
	pub through: Option<MonthRef>,
	pub services: Vec<ServiceType>,
	pub feed: Feed,
}

impl SourceOptions {
	/// Pick the request by precedence: file patterns, then an explicit URL,
	/// then year/month.
	pub fn into_request(self) -> Result<SourceRequest, IngestError> {
		if !self.files.is_empty() {
			if self.url.is_some() || self.year.is_some() {
				warn!("--file given; ignoring --url and --year/--month");
			}
			return Ok(SourceRequest::Patterns(self.files));
		}

		if let Some(raw) = self.url {
			let url = Url::parse(&raw)
				.map_err(|e| IngestError::Configuration(format!("invalid URL '{}': {}", raw, e)))?;
			return Ok(SourceRequest::Url(url));
		}

		match (self.year, self.month) {
			(Some(year), Some(month)) => {
				if self.services.is_empty() {
					return Err(IngestError::Configuration(
						"at least one service type is required".to_string(),
					));
				}
				let start = MonthRef::new(year, month)?;
				let end = self.through.unwrap_or(start);
				if end < start {
					return Err(IngestError::Configuration(format!(
						"--through {} is before {}",
						end, start
					)));
				}
				Ok(SourceRequest::Months {
					feed: self.feed,
					services: self.services,
					start,
					end,
				})
			}
			(None, None) => Err(IngestError::Configuration(
				"no input given: use --file, --url or --year with --month".to_string(),
			)),
			_ => Err(IngestError::Configuration(
				"--year and --month must be given together".to_string(),
			)),
		}
	}
}

/// Resolve a request into the ordered list of locations to ingest.
pub fn resolve(request: &SourceRequest) -> Result<Vec<InputLocation>, IngestError> {
	match request {
		SourceRequest::Patterns(patterns) => Ok(expand_patterns(patterns)?
			.into_iter()
			.map(InputLocation::Local)
			.collect()),
		SourceRequest::Url(url) => Ok(vec![InputLocation::Remote(RemoteSource {
			url: url.clone(),
			service: service_from_name(url.path()),
		})]),
		SourceRequest::Months {
			feed,
			services,
			start,
			end,
		} => {
			let months = remote::months_between(*start, *end)?;
			let mut out = Vec::with_capacity(services.len() * months.len());
			for service in services {
				for month in &months {
					out.push(InputLocation::Remote(RemoteSource {
						url: remote::trip_data_url(*feed, *service, *month)?,
						service: Some(*service),
					}));
				}
			}
			Ok(out)
		}
	}
}

/// Expand every pattern against the local filesystem.
///
/// The result is the deduplicated union of all matches, sorted by path bytes,
/// so it does not depend on the order the patterns were given in. Patterns
/// that match nothing are logged; if nothing matches at all the run fails
/// with [`IngestError::NoMatches`].
pub fn expand_patterns(patterns: &[String]) -> Result<Vec<PathBuf>, IngestError> {
	let mut matched = Vec::new();
	let mut missing = Vec::new();

	for pat in patterns {
		let paths = glob::glob(pat).map_err(|e| {
			IngestError::Configuration(format!("invalid pattern '{}': {}", pat, e))
		})?;

		let mut hits: Vec<PathBuf> = Vec::new();
		for entry in paths {
			let path = entry.map_err(|e| {
				let p = e.path().to_path_buf();
				IngestError::io(p, std::io::Error::from(e))
			})?;
			if path.is_file() {
				hits.push(path);
			}
		}

		info!("Pattern '{}' -> {} match(es)", pat, hits.len());
		if hits.is_empty() {
			missing.push(pat.clone());
		}
		matched.extend(hits);
	}

	if matched.is_empty() {
		return Err(IngestError::NoMatches { patterns: missing });
	}
	if !missing.is_empty() {
		warn!("Patterns without matches: {}", missing.join(", "));
	}

	matched.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
	matched.dedup();
	Ok(matched)
}

/// File name of a location, used for cache paths and log lines.
pub(crate) fn file_name_of(path: &str) -> Option<&str> {
	Path::new(path)
		.file_name()
		.and_then(|n| n.to_str())
		.filter(|n| !n.is_empty())
}
