use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::IngestError;

/// Suffixes the reader accepts, as shown to users.
pub const ACCEPTED_SUFFIXES: &str = ".parquet, .parquet.gz, .parquet.gzip, .csv, .csv.gz, .gz";

/// How a location is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
	/// Whole-file columnar read, one batch.
	Parquet { gzipped: bool },
	/// Chunked text read, many batches.
	Csv { gzipped: bool },
}

impl SourceFormat {
	pub fn as_str(&self) -> &str {
		match self {
			SourceFormat::Parquet { gzipped: false } => "parquet",
			SourceFormat::Parquet { gzipped: true } => "parquet.gz",
			SourceFormat::Csv { gzipped: false } => "csv",
			SourceFormat::Csv { gzipped: true } => "csv.gz",
		}
	}

	pub fn is_gzipped(&self) -> bool {
		match self {
			SourceFormat::Parquet { gzipped } | SourceFormat::Csv { gzipped } => *gzipped,
		}
	}

	/// Decide the format from a file name or URL path suffix, case-insensitively.
	pub fn from_suffix(name: &str) -> Option<Self> {
		let lower = name.to_lowercase();
		if lower.ends_with(".parquet") {
			Some(SourceFormat::Parquet { gzipped: false })
		} else if lower.ends_with(".parquet.gz") || lower.ends_with(".parquet.gzip") {
			Some(SourceFormat::Parquet { gzipped: true })
		} else if lower.ends_with(".csv") {
			Some(SourceFormat::Csv { gzipped: false })
		} else if lower.ends_with(".csv.gz") || lower.ends_with(".gz") {
			Some(SourceFormat::Csv { gzipped: true })
		} else {
			None
		}
	}
}

/// Detect the format of a location. `name` is the local path or the URL path
/// (query strings must already be stripped); `location` is what error
/// messages show.
pub fn detect_format(name: &str, location: &str) -> Result<SourceFormat, IngestError> {
	SourceFormat::from_suffix(name).ok_or_else(|| IngestError::UnsupportedFormat {
		location: location.to_string(),
		accepted: ACCEPTED_SUFFIXES,
	})
}

/// Whether a sample begins with the gzip magic bytes.
pub fn is_gzip(peek: &[u8]) -> bool {
	peek.len() >= 2 && peek[0] == 0x1f && peek[1] == 0x8b
}

/// Check the first bytes of a file for the gzip magic. Some servers hand out
/// already-decompressed bodies under a `.gz` name; those read as plain files.
pub fn sniff_gzip(path: &Path) -> Result<bool, IngestError> {
	let mut f = File::open(path).map_err(|e| IngestError::io(path, e))?;
	let mut peek = [0u8; 2];
	let mut filled = 0;
	while filled < peek.len() {
		let n = f
			.read(&mut peek[filled..])
			.map_err(|e| IngestError::io(path, e))?;
		if n == 0 {
			break;
		}
		filled += n;
	}
	Ok(is_gzip(&peek[..filled]))
}
