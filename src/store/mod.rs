//! Destination tables: the `TableStore` seam, its Postgres and Parquet
//! implementations, and the `Loader` that decides between create and append.

pub mod parquet;
pub mod postgres;
pub mod sql_types;

#[cfg(test)]
pub mod test_utils;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;

use crate::error::IngestError;
use crate::observability::MetricsRegistry;
use crate::source::remote::ServiceType;

pub use self::parquet::ParquetStore;
pub use self::postgres::PgStore;
pub use self::sql_types::SqlType;

/// Placeholder replaced by the service type of the location being loaded.
pub const SERVICE_PLACEHOLDER: &str = "{service_type}";

/// What to do when the destination table already exists at the first write
/// of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
	/// Keep existing rows and append.
	#[default]
	Append,
	/// Drop and recreate the table.
	Replace,
}

/// A destination table name, optionally schema-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
	pub schema: Option<String>,
	pub name: String,
}

impl TableName {
	/// Parse `table` or `schema.table`.
	pub fn parse(raw: &str) -> Result<Self, IngestError> {
		let invalid = |reason: &str| {
			IngestError::Configuration(format!("invalid table name '{}': {}", raw, reason))
		};

		let parts: Vec<&str> = raw.trim().split('.').collect();
		if parts.len() > 2 {
			return Err(invalid("expected 'table' or 'schema.table'"));
		}
		for part in &parts {
			if part.is_empty() {
				return Err(invalid("empty identifier"));
			}
			if part.contains(['"', '\0', '/', '\\']) {
				return Err(invalid("identifiers may not contain quotes, NUL or path separators"));
			}
		}

		Ok(match parts.as_slice() {
			[schema, name] => TableName {
				schema: Some(schema.to_string()),
				name: name.to_string(),
			},
			[name] => TableName {
				schema: None,
				name: name.to_string(),
			},
			_ => return Err(invalid("empty identifier")),
		})
	}

	/// Resolve a table template for one location. `{service_type}` needs a
	/// known service type.
	pub fn from_template(
		template: &str,
		service: Option<ServiceType>,
		location: &str,
	) -> Result<Self, IngestError> {
		if !template.contains(SERVICE_PLACEHOLDER) {
			return Self::parse(template);
		}
		let service = service.ok_or_else(|| {
			IngestError::Configuration(format!(
				"table '{}' needs a service type, but none is known for '{}'",
				template, location
			))
		})?;
		Self::parse(&template.replace(SERVICE_PLACEHOLDER, service.as_str()))
	}

	/// Double-quoted SQL identifier.
	pub fn quoted(&self) -> String {
		match &self.schema {
			Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
			None => quote_ident(&self.name),
		}
	}
}

impl fmt::Display for TableName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.schema {
			Some(schema) => write!(f, "{}.{}", schema, self.name),
			None => write!(f, "{}", self.name),
		}
	}
}

pub fn quote_ident(ident: &str) -> String {
	format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A destination column. `sql_type` is `None` when the stored type has no
/// counterpart in [`SqlType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
	pub name: String,
	pub sql_type: Option<SqlType>,
}

impl TableColumn {
	pub fn new(name: impl Into<String>, sql_type: Option<SqlType>) -> Self {
		Self {
			name: name.into(),
			sql_type,
		}
	}

	pub fn from_field(field: &Field) -> Self {
		Self::new(field.name().clone(), SqlType::for_arrow(field.data_type()))
	}

	/// Columns of an Arrow schema, in order.
	pub fn from_schema(schema: &Schema) -> Vec<Self> {
		schema.fields().iter().map(|f| Self::from_field(f)).collect()
	}
}

/// Storage backend for destination tables.
#[async_trait]
pub trait TableStore: Send + Sync {
	/// Columns of `table` in order, or `None` when it does not exist.
	async fn table_columns(&self, table: &TableName) -> Result<Option<Vec<TableColumn>>, IngestError>;

	/// Create `table` with the columns of `schema`. With `replace` an existing
	/// table is dropped first.
	async fn create_table(
		&self,
		table: &TableName,
		schema: &Schema,
		replace: bool,
	) -> Result<(), IngestError>;

	/// Append every row of `batch` atomically and return the row count. Batch
	/// columns must exist in the table with the same [`SqlType`].
	async fn append(&self, table: &TableName, batch: &RecordBatch) -> Result<u64, IngestError>;
}

/// Writes batches to a store, preparing each table on its first write of
/// the run.
pub struct Loader {
	store: Arc<dyn TableStore>,
	if_exists: IfExists,
	prepared: HashMap<TableName, Vec<TableColumn>>,
	created: Vec<TableName>,
	metrics: Arc<MetricsRegistry>,
}

impl Loader {
	pub fn new(store: Arc<dyn TableStore>, if_exists: IfExists, metrics: Arc<MetricsRegistry>) -> Self {
		Self {
			store,
			if_exists,
			prepared: HashMap::new(),
			created: Vec::new(),
			metrics,
		}
	}

	/// Tables created or replaced during this run, in creation order.
	pub fn created_tables(&self) -> &[TableName] {
		&self.created
	}

	/// Write one batch. Empty batches are skipped without touching the store.
	pub async fn write(&mut self, table: &TableName, batch: &RecordBatch) -> Result<u64, IngestError> {
		if batch.num_rows() == 0 {
			debug!("Skipping empty batch for {}", table);
			return Ok(0);
		}

		if !self.prepared.contains_key(table) {
			self.prepare(table, batch.schema_ref()).await?;
		}
		let batch = conform(table, &self.prepared[table], batch)?;

		let timer = self.metrics.batch_write_seconds.start_timer();
		let rows = self.store.append(table, &batch).await?;
		timer.observe_duration();

		self.metrics.batches_total.inc();
		self.metrics.rows_total.inc_by(rows);
		debug!("Appended {} rows to {}", rows, table);
		Ok(rows)
	}

	async fn prepare(&mut self, table: &TableName, schema: &Schema) -> Result<(), IngestError> {
		let existing = self.store.table_columns(table).await?;
		let columns = match (existing, self.if_exists) {
			(Some(columns), IfExists::Append) => {
				info!("Appending to existing table {}", table);
				columns
			}
			(existing, _) => {
				let replace = existing.is_some();
				self.store.create_table(table, schema, replace).await?;
				self.metrics.tables_created_total.inc();
				self.created.push(table.clone());
				if replace {
					info!("Replaced table {}", table);
				} else {
					info!("Created table {}", table);
				}
				TableColumn::from_schema(schema)
			}
		};
		self.prepared.insert(table.clone(), columns);
		Ok(())
	}
}

/// Check `batch` against the destination columns. Every batch column must
/// exist with the same SQL type; all-null columns take the stored type.
fn conform(table: &TableName, columns: &[TableColumn], batch: &RecordBatch) -> Result<RecordBatch, IngestError> {
	let violation = |message: String| IngestError::SchemaViolation {
		location: table.to_string(),
		message,
	};

	let mut missing = Vec::new();
	let mut mismatched = Vec::new();
	let mut null_casts = Vec::new();
	for (idx, field) in batch.schema_ref().fields().iter().enumerate() {
		let Some(column) = columns.iter().find(|c| c.name == *field.name()) else {
			missing.push(field.name().as_str());
			continue;
		};
		let batch_type = SqlType::for_arrow(field.data_type());
		match (field.data_type(), column.sql_type) {
			(DataType::Null, Some(stored)) => null_casts.push((idx, stored)),
			(_, Some(stored)) if batch_type == Some(stored) => {}
			(_, stored) => mismatched.push(format!(
				"'{}' is {} but the table stores {}",
				field.name(),
				field.data_type(),
				stored.map_or("an unsupported type", |t| t.as_sql())
			)),
		}
	}

	if !missing.is_empty() {
		return Err(violation(format!(
			"column(s) {} do not exist in the destination table",
			missing.join(", ")
		)));
	}
	if !mismatched.is_empty() {
		return Err(violation(format!("incompatible column type(s): {}", mismatched.join("; "))));
	}
	if null_casts.is_empty() {
		return Ok(batch.clone());
	}

	let mut fields: Vec<Field> = batch.schema_ref().fields().iter().map(|f| f.as_ref().clone()).collect();
	let mut arrays = batch.columns().to_vec();
	for (idx, stored) in null_casts {
		let data_type = stored.arrow_type();
		arrays[idx] = cast(&arrays[idx], &data_type).map_err(|e| violation(e.to_string()))?;
		fields[idx] = fields[idx].clone().with_data_type(data_type).with_nullable(true);
	}
	let schema = Schema::new_with_metadata(fields, batch.schema_ref().metadata().clone());
	RecordBatch::try_new(Arc::new(schema), arrays).map_err(|e| violation(e.to_string()))
}

#[cfg(test)]
mod tests {
	use arrow::array::{Array, ArrayRef, Float64Array, Int32Array, NullArray, StringArray};

	use super::test_utils::{MemoryStore, StoreCall, int_batch};
	use super::*;

	fn loader(store: &Arc<MemoryStore>, if_exists: IfExists) -> Loader {
		Loader::new(
			store.clone(),
			if_exists,
			Arc::new(MetricsRegistry::new().expect("metrics")),
		)
	}

	#[test]
	fn parse_table_names() {
		assert_eq!(
			TableName::parse("ingestion.trips").unwrap(),
			TableName {
				schema: Some("ingestion".into()),
				name: "trips".into()
			}
		);
		assert_eq!(TableName::parse("trips").unwrap().schema, None);
		assert!(TableName::parse("a.b.c").is_err());
		assert!(TableName::parse("a.").is_err());
		assert!(TableName::parse("").is_err());
		assert!(TableName::parse("bad\"name").is_err());
		assert!(TableName::parse("../etc").is_err());
	}

	#[test]
	fn quoted_identifiers() {
		assert_eq!(TableName::parse("ingestion.Trips").unwrap().quoted(), "\"ingestion\".\"Trips\"");
		assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
	}

	#[test]
	fn table_template() {
		let t = TableName::from_template("{service_type}_taxi_data", Some(ServiceType::Green), "x").unwrap();
		assert_eq!(t.to_string(), "green_taxi_data");

		let err = TableName::from_template("{service_type}_taxi_data", None, "trips.csv").unwrap_err();
		assert!(matches!(err, IngestError::Configuration(ref m) if m.contains("trips.csv")));

		let plain = TableName::from_template("trips", None, "x").unwrap();
		assert_eq!(plain.to_string(), "trips");
	}

	#[tokio::test]
	async fn first_write_creates_then_appends() {
		let store = Arc::new(MemoryStore::default());
		let mut loader = loader(&store, IfExists::Append);
		let table = TableName::parse("trips").unwrap();

		assert_eq!(loader.write(&table, &int_batch(&["a"], 3)).await.unwrap(), 3);
		assert_eq!(loader.write(&table, &int_batch(&["a"], 2)).await.unwrap(), 2);

		assert_eq!(store.row_count(&table), 5);
		assert_eq!(
			store.calls(),
			vec![
				StoreCall::Columns("trips".into()),
				StoreCall::Create("trips".into(), false),
				StoreCall::Append("trips".into(), 3),
				StoreCall::Append("trips".into(), 2),
			]
		);
		assert_eq!(loader.created_tables(), &[table]);
	}

	#[tokio::test]
	async fn existing_table_is_kept_on_append() {
		let store = Arc::new(MemoryStore::default());
		let table = TableName::parse("trips").unwrap();
		store.seed(&table, &int_batch(&["a"], 4));

		let mut loader = loader(&store, IfExists::Append);
		loader.write(&table, &int_batch(&["a"], 1)).await.unwrap();
		assert_eq!(store.row_count(&table), 5);
		assert!(loader.created_tables().is_empty());
	}

	#[tokio::test]
	async fn existing_table_is_dropped_on_replace() {
		let store = Arc::new(MemoryStore::default());
		let table = TableName::parse("trips").unwrap();
		store.seed(&table, &int_batch(&["a"], 4));

		let mut loader = loader(&store, IfExists::Replace);
		loader.write(&table, &int_batch(&["a"], 1)).await.unwrap();
		loader.write(&table, &int_batch(&["a"], 2)).await.unwrap();
		assert_eq!(store.row_count(&table), 3);
		assert!(store.calls().contains(&StoreCall::Create("trips".into(), true)));
	}

	#[tokio::test]
	async fn empty_batch_never_touches_store() {
		let store = Arc::new(MemoryStore::default());
		let mut loader = loader(&store, IfExists::Append);
		let table = TableName::parse("trips").unwrap();

		assert_eq!(loader.write(&table, &int_batch(&["a"], 0)).await.unwrap(), 0);
		assert!(store.calls().is_empty());
	}

	#[tokio::test]
	async fn unknown_column_is_a_schema_violation() {
		let store = Arc::new(MemoryStore::default());
		let mut loader = loader(&store, IfExists::Append);
		let table = TableName::parse("trips").unwrap();

		loader.write(&table, &int_batch(&["a"], 1)).await.unwrap();
		let err = loader.write(&table, &int_batch(&["a", "b"], 1)).await.unwrap_err();
		assert!(matches!(err, IngestError::SchemaViolation { ref message, .. } if message.contains('b')));
		assert_eq!(store.row_count(&table), 1);
	}

	fn single_column(name: &str, array: ArrayRef) -> RecordBatch {
		let field = Field::new(name, array.data_type().clone(), true);
		RecordBatch::try_new(Arc::new(Schema::new(vec![field])), vec![array]).unwrap()
	}

	#[tokio::test]
	async fn changed_column_type_is_a_schema_violation() {
		let store = Arc::new(MemoryStore::default());
		let mut loader = loader(&store, IfExists::Append);
		let table = TableName::parse("trips").unwrap();

		loader.write(&table, &int_batch(&["passenger_count"], 2)).await.unwrap();

		let floats = single_column("passenger_count", Arc::new(Float64Array::from(vec![1.5])));
		let err = loader.write(&table, &floats).await.unwrap_err();
		assert!(matches!(
			err,
			IngestError::SchemaViolation { ref message, .. }
				if message.contains("passenger_count") && message.contains("BIGINT")
		));
		assert_eq!(err.exit_code(), 4);

		let text = single_column("passenger_count", Arc::new(StringArray::from(vec!["1"])));
		let err = loader.write(&table, &text).await.unwrap_err();
		assert!(matches!(err, IngestError::SchemaViolation { .. }));

		assert_eq!(store.row_count(&table), 2);
		assert_eq!(store.append_count(), 1);
	}

	#[tokio::test]
	async fn narrower_integers_and_null_columns_are_accepted() {
		let store = Arc::new(MemoryStore::default());
		let table = TableName::parse("trips").unwrap();
		store.seed(&table, &int_batch(&["passenger_count"], 1));
		let mut loader = loader(&store, IfExists::Append);

		let narrow = single_column("passenger_count", Arc::new(Int32Array::from(vec![1, 2])));
		assert_eq!(loader.write(&table, &narrow).await.unwrap(), 2);

		let nulls = single_column("passenger_count", Arc::new(NullArray::new(3)));
		assert_eq!(loader.write(&table, &nulls).await.unwrap(), 3);
		assert_eq!(store.appended_types(&table).last(), Some(&vec![DataType::Int64]));
		assert_eq!(store.row_count(&table), 6);
	}

	#[tokio::test]
	async fn stored_column_of_unknown_type_rejects_writes() {
		let store = Arc::new(MemoryStore::default());
		let table = TableName::parse("trips").unwrap();
		store.seed_columns(&table, vec![TableColumn::new("payload", None)]);
		let mut loader = loader(&store, IfExists::Append);

		let err = loader.write(&table, &int_batch(&["payload"], 1)).await.unwrap_err();
		assert!(matches!(
			err,
			IngestError::SchemaViolation { ref message, .. } if message.contains("unsupported")
		));
	}
}
