use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use log::debug;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::reader::ChunkReader;

use crate::error::IngestError;
use crate::ingest::format_detection::{SourceFormat, sniff_gzip};
use crate::ingest::schema::{ColumnKind, TRIP_DTYPES, declared_kind};

/// Reader parameters shared by every location of a run.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
	/// Maximum rows per CSV batch.
	pub batch_size: usize,
	/// Declared raw column types applied to CSV input.
	pub dtypes: &'static [(&'static str, ColumnKind)],
}

impl ReaderOptions {
	pub fn new(batch_size: usize) -> Self {
		Self {
			batch_size,
			dtypes: TRIP_DTYPES,
		}
	}
}

/// Lazy, finite, non-restartable sequence of row batches from one location.
///
/// Parquet input yields exactly one batch with every row; CSV input yields
/// batches of at most `batch_size` rows in file order. Zero-row CSV batches
/// are never emitted.
pub struct BatchStream {
	location: String,
	inner: Inner,
}

enum Inner {
	Whole(Option<RecordBatch>),
	Chunked(arrow::csv::Reader<Box<dyn Read + Send>>),
	Empty,
}

impl BatchStream {
	pub fn location(&self) -> &str {
		&self.location
	}
}

impl Iterator for BatchStream {
	type Item = Result<RecordBatch, IngestError>;

	fn next(&mut self) -> Option<Self::Item> {
		match &mut self.inner {
			Inner::Whole(batch) => batch.take().map(Ok),
			Inner::Empty => None,
			Inner::Chunked(reader) => loop {
				match reader.next()? {
					Ok(batch) if batch.num_rows() == 0 => continue,
					Ok(batch) => return Some(Ok(batch)),
					Err(e) => {
						// A failed batch ends the stream.
						self.inner = Inner::Empty;
						return Some(Err(csv_error(&self.location, e)));
					}
				}
			},
		}
	}
}

fn csv_error(location: &str, e: ArrowError) -> IngestError {
	match e {
		ArrowError::ParseError(message) | ArrowError::CastError(message) => {
			IngestError::SchemaViolation {
				location: location.to_string(),
				message,
			}
		}
		other => read_error(location, other),
	}
}

fn read_error(location: &str, e: impl std::fmt::Display) -> IngestError {
	IngestError::Read {
		location: location.to_string(),
		message: e.to_string(),
	}
}

/// Open a local file in the given format. `location` names the source in
/// error messages (the URL for downloaded files).
pub fn open_batches(
	path: &Path,
	location: &str,
	format: SourceFormat,
	options: &ReaderOptions,
) -> Result<BatchStream, IngestError> {
	let gzipped = format.is_gzipped() && sniff_gzip(path)?;
	debug!(
		"Opening {} as {} (gzip stream: {})",
		location,
		format.as_str(),
		gzipped
	);

	let inner = match format {
		SourceFormat::Parquet { .. } => Inner::Whole(Some(read_parquet_file(path, location, gzipped)?)),
		SourceFormat::Csv { .. } => open_csv(path, location, gzipped, options)?,
	};

	Ok(BatchStream {
		location: location.to_string(),
		inner,
	})
}

fn open_text(path: &Path, gzipped: bool) -> Result<Box<dyn Read + Send>, IngestError> {
	let file = File::open(path).map_err(|e| IngestError::io(path, e))?;
	if gzipped {
		Ok(Box::new(MultiGzDecoder::new(BufReader::new(file))))
	} else {
		Ok(Box::new(file))
	}
}

/// Arrow schema for a CSV header: declared columns get their dtype, every
/// other column is text.
fn csv_schema(headers: &csv::StringRecord, dtypes: &[(&str, ColumnKind)]) -> Schema {
	let fields: Vec<Field> = headers
		.iter()
		.map(|name| {
			let data_type = declared_kind(dtypes, name)
				.map(|k| k.data_type())
				.unwrap_or(DataType::Utf8);
			Field::new(name, data_type, true)
		})
		.collect();
	Schema::new(fields)
}

fn open_csv(
	path: &Path,
	location: &str,
	gzipped: bool,
	options: &ReaderOptions,
) -> Result<Inner, IngestError> {
	// The header is read up front to build the typed schema; the data pass
	// reopens the file.
	let mut header_reader = csv::ReaderBuilder::new()
		.has_headers(true)
		.from_reader(open_text(path, gzipped)?);
	let headers = header_reader
		.headers()
		.map_err(|e| read_error(location, e))?
		.clone();
	if headers.is_empty() {
		return Ok(Inner::Empty);
	}

	let schema = Arc::new(csv_schema(&headers, options.dtypes));
	let reader = arrow::csv::ReaderBuilder::new(schema)
		.with_header(true)
		.with_batch_size(options.batch_size)
		.build(open_text(path, gzipped)?)
		.map_err(|e| read_error(location, e))?;
	Ok(Inner::Chunked(reader))
}

fn read_parquet_file(path: &Path, location: &str, gzipped: bool) -> Result<RecordBatch, IngestError> {
	if gzipped {
		let mut buf = Vec::new();
		open_text(path, true)?
			.read_to_end(&mut buf)
			.map_err(|e| read_error(location, e))?;
		read_parquet(Bytes::from(buf), location)
	} else {
		let file = File::open(path).map_err(|e| IngestError::io(path, e))?;
		read_parquet(file, location)
	}
}

fn read_parquet<R: ChunkReader + 'static>(input: R, location: &str) -> Result<RecordBatch, IngestError> {
	let builder =
		ParquetRecordBatchReaderBuilder::try_new(input).map_err(|e| read_error(location, e))?;
	let schema = builder.schema().clone();
	let reader = builder.build().map_err(|e| read_error(location, e))?;
	let batches = reader
		.collect::<Result<Vec<_>, _>>()
		.map_err(|e| read_error(location, e))?;
	concat_batches(&schema, &batches).map_err(|e| read_error(location, e))
}
