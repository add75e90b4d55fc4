use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, new_null_array};
use arrow::compute::{CastOptions, cast_with_options};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use async_trait::async_trait;
use log::debug;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::{TableColumn, TableName, TableStore};
use crate::error::IngestError;

/// Zero-row file holding a table's schema.
const SCHEMA_FILE: &str = "_schema.parquet";
const PART_PREFIX: &str = "part-";

/// Local analytical store: one directory per table under `root`, one Parquet
/// part file per appended batch.
///
/// Part files are written under a temporary name and renamed into place, so a
/// batch is either fully visible or absent. Every part carries the table
/// schema recorded at creation.
#[derive(Debug, Clone)]
pub struct ParquetStore {
	root: PathBuf,
}

impl ParquetStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn table_dir(&self, table: &TableName) -> PathBuf {
		self.root.join(table.to_string())
	}

	/// Every stored batch of `table`, in append order.
	pub fn read_table(&self, table: &TableName) -> Result<Vec<RecordBatch>, IngestError> {
		let dir = self.table_dir(table);
		let mut batches = Vec::new();
		for part in part_files(&dir)? {
			let file = File::open(&part).map_err(|e| IngestError::io(&part, e))?;
			let reader = ParquetRecordBatchReaderBuilder::try_new(file)
				.and_then(|b| b.build())
				.map_err(|e| IngestError::store(table, e))?;
			for batch in reader {
				batches.push(batch.map_err(|e| IngestError::store(table, e))?);
			}
		}
		Ok(batches)
	}

	/// Schema recorded when `table` was created, or `None` when it does not exist.
	pub fn stored_schema(&self, table: &TableName) -> Result<Option<SchemaRef>, IngestError> {
		let path = self.table_dir(table).join(SCHEMA_FILE);
		let file = match File::open(&path) {
			Ok(f) => f,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(IngestError::io(&path, e)),
		};
		let builder =
			ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| IngestError::store(table, e))?;
		Ok(Some(builder.schema().clone()))
	}

	/// Total rows stored in `table`.
	pub fn row_count(&self, table: &TableName) -> Result<usize, IngestError> {
		Ok(self.read_table(table)?.iter().map(|b| b.num_rows()).sum())
	}
}

fn part_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
	let entries = match fs::read_dir(dir) {
		Ok(entries) => entries,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
		Err(e) => return Err(IngestError::io(dir, e)),
	};
	let mut parts = Vec::new();
	for entry in entries {
		let path = entry.map_err(|e| IngestError::io(dir, e))?.path();
		let is_part = path
			.file_name()
			.and_then(|n| n.to_str())
			.is_some_and(|n| n.starts_with(PART_PREFIX) && n.ends_with(".parquet"));
		if is_part {
			parts.push(path);
		}
	}
	// Zero-padded indices sort in append order.
	parts.sort();
	Ok(parts)
}

fn write_file(path: &Path, schema: SchemaRef, batch: Option<&RecordBatch>) -> Result<(), String> {
	let mut tmp = path.as_os_str().to_owned();
	tmp.push(".tmp");
	let tmp = PathBuf::from(tmp);

	let file = File::create(&tmp).map_err(|e| e.to_string())?;
	let mut writer = ArrowWriter::try_new(file, schema, None).map_err(|e| e.to_string())?;
	if let Some(batch) = batch {
		writer.write(batch).map_err(|e| e.to_string())?;
	}
	writer.close().map_err(|e| e.to_string())?;
	fs::rename(&tmp, path).map_err(|e| e.to_string())
}

/// Cast `batch` to the table schema. Table columns absent from the batch are
/// filled with nulls; casts that would lose values fail.
fn conform(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch, String> {
	if let Some(extra) = batch
		.schema_ref()
		.fields()
		.iter()
		.find(|f| schema.field_with_name(f.name()).is_err())
	{
		return Err(format!("column '{}' does not exist in the destination table", extra.name()));
	}

	let options = CastOptions {
		safe: false,
		..CastOptions::default()
	};
	let columns = schema
		.fields()
		.iter()
		.map(|field| match batch.column_by_name(field.name()) {
			Some(column) => cast_with_options(column, field.data_type(), &options)
				.map_err(|e| format!("column '{}': {}", field.name(), e)),
			None => Ok(new_null_array(field.data_type(), batch.num_rows())),
		})
		.collect::<Result<Vec<ArrayRef>, String>>()?;
	let row_count = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
	RecordBatch::try_new_with_options(schema.clone(), columns, &row_count).map_err(|e| e.to_string())
}

fn create_blocking(dir: &Path, schema: SchemaRef, replace: bool) -> Result<(), String> {
	if replace && dir.exists() {
		fs::remove_dir_all(dir).map_err(|e| e.to_string())?;
	}
	fs::create_dir_all(dir).map_err(|e| e.to_string())?;
	write_file(&dir.join(SCHEMA_FILE), schema, None)
}

fn append_blocking(dir: &Path, batch: &RecordBatch) -> Result<(), String> {
	let next = part_files(dir).map_err(|e| e.to_string())?.len();
	let path = dir.join(format!("{}{:05}.parquet", PART_PREFIX, next));
	debug!("Writing {} rows to {}", batch.num_rows(), path.display());
	write_file(&path, batch.schema(), Some(batch))
}

#[async_trait]
impl TableStore for ParquetStore {
	async fn table_columns(&self, table: &TableName) -> Result<Option<Vec<TableColumn>>, IngestError> {
		Ok(self
			.stored_schema(table)?
			.map(|schema| TableColumn::from_schema(&schema)))
	}

	async fn create_table(
		&self,
		table: &TableName,
		schema: &Schema,
		replace: bool,
	) -> Result<(), IngestError> {
		let dir = self.table_dir(table);
		// All-null columns are stored as text, matching their SQL type.
		let fields: Vec<Field> = schema
			.fields()
			.iter()
			.map(|f| match f.data_type() {
				DataType::Null => f.as_ref().clone().with_data_type(DataType::Utf8),
				_ => f.as_ref().clone(),
			})
			.collect();
		let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
		tokio::task::spawn_blocking(move || create_blocking(&dir, schema, replace))
			.await
			.map_err(|e| IngestError::store(table, e))?
			.map_err(|e| IngestError::store(table, e))
	}

	async fn append(&self, table: &TableName, batch: &RecordBatch) -> Result<u64, IngestError> {
		let schema = self
			.stored_schema(table)?
			.ok_or_else(|| IngestError::store(table, "table does not exist"))?;
		let batch = conform(batch, &schema).map_err(|message| IngestError::SchemaViolation {
			location: table.to_string(),
			message,
		})?;
		let dir = self.table_dir(table);
		let rows = batch.num_rows() as u64;
		tokio::task::spawn_blocking(move || append_blocking(&dir, &batch))
			.await
			.map_err(|e| IngestError::store(table, e))?
			.map_err(|e| IngestError::store(table, e))?;
		Ok(rows)
	}
}
