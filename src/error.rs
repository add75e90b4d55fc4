use std::path::PathBuf;

use thiserror::Error;

use crate::config::SettingsError;

/// Every way an ingestion run can fail. All variants are fatal: they surface
/// to the top level and terminate the run, leaving already committed batches
/// in place.
#[derive(Debug, Error)]
pub enum IngestError {
	#[error("configuration error: {0}")]
	Configuration(String),

	#[error("no files matched the given path/pattern(s): {}", .patterns.join(", "))]
	NoMatches { patterns: Vec<String> },

	#[error("unsupported file extension for '{location}'. Supported: {accepted}")]
	UnsupportedFormat {
		location: String,
		accepted: &'static str,
	},

	#[error("schema violation in {location}: {message}")]
	SchemaViolation { location: String, message: String },

	#[error("failed to fetch '{url}': {message}")]
	Transfer { url: String, message: String },

	#[error("write to table '{table}' failed: {message}")]
	StoreWrite { table: String, message: String },

	#[error("failed to read '{location}': {message}")]
	Read { location: String, message: String },

	#[error("I/O error on '{}': {source}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

impl IngestError {
	pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		IngestError::Io {
			path: path.into(),
			source,
		}
	}

	pub fn store(table: impl ToString, err: impl std::fmt::Display) -> Self {
		IngestError::StoreWrite {
			table: table.to_string(),
			message: err.to_string(),
		}
	}

	/// Process exit status for this error kind.
	pub fn exit_code(&self) -> u8 {
		match self {
			IngestError::Configuration(_) | IngestError::NoMatches { .. } => 2,
			IngestError::UnsupportedFormat { .. } => 3,
			IngestError::SchemaViolation { .. } => 4,
			IngestError::Transfer { .. } => 5,
			IngestError::StoreWrite { .. } => 6,
			IngestError::Read { .. } | IngestError::Io { .. } => 7,
		}
	}
}

impl From<SettingsError> for IngestError {
	fn from(e: SettingsError) -> Self {
		IngestError::Configuration(e.to_string())
	}
}
