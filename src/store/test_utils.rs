//! In-memory `TableStore` double that records every call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;

use super::{TableColumn, TableName, TableStore};
use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
	Columns(String),
	Create(String, bool),
	Append(String, usize),
}

#[derive(Default)]
struct Table {
	columns: Vec<TableColumn>,
	rows: usize,
	/// Column types of every appended batch.
	appended: Vec<Vec<DataType>>,
}

#[derive(Default)]
struct Inner {
	tables: HashMap<TableName, Table>,
	calls: Vec<StoreCall>,
	/// Appends allowed before every further append fails.
	appends_left: Option<usize>,
}

#[derive(Default)]
pub struct MemoryStore {
	inner: Mutex<Inner>,
}

impl MemoryStore {
	/// Make every append after the first `n` fail.
	pub fn failing_after(n: usize) -> Self {
		let store = Self::default();
		store.inner.lock().unwrap().appends_left = Some(n);
		store
	}

	/// Pre-create a table holding the rows of `batch` without recording calls.
	pub fn seed(&self, table: &TableName, batch: &RecordBatch) {
		let seeded = Table {
			columns: TableColumn::from_schema(batch.schema_ref()),
			rows: batch.num_rows(),
			appended: Vec::new(),
		};
		self.inner.lock().unwrap().tables.insert(table.clone(), seeded);
	}

	/// Pre-create an empty table with explicit column types.
	pub fn seed_columns(&self, table: &TableName, columns: Vec<TableColumn>) {
		let seeded = Table {
			columns,
			..Table::default()
		};
		self.inner.lock().unwrap().tables.insert(table.clone(), seeded);
	}

	/// Arrow types of each batch appended to `table`, in order.
	pub fn appended_types(&self, table: &TableName) -> Vec<Vec<DataType>> {
		self.inner
			.lock()
			.unwrap()
			.tables
			.get(table)
			.map(|t| t.appended.clone())
			.unwrap_or_default()
	}

	pub fn calls(&self) -> Vec<StoreCall> {
		self.inner.lock().unwrap().calls.clone()
	}

	pub fn row_count(&self, table: &TableName) -> usize {
		self.inner
			.lock()
			.unwrap()
			.tables
			.get(table)
			.map(|t| t.rows)
			.unwrap_or(0)
	}

	pub fn has_table(&self, table: &TableName) -> bool {
		self.inner.lock().unwrap().tables.contains_key(table)
	}

	pub fn append_count(&self) -> usize {
		self.calls()
			.iter()
			.filter(|c| matches!(c, StoreCall::Append(..)))
			.count()
	}
}

#[async_trait]
impl TableStore for MemoryStore {
	async fn table_columns(&self, table: &TableName) -> Result<Option<Vec<TableColumn>>, IngestError> {
		let mut inner = self.inner.lock().unwrap();
		inner.calls.push(StoreCall::Columns(table.to_string()));
		Ok(inner.tables.get(table).map(|t| t.columns.clone()))
	}

	async fn create_table(
		&self,
		table: &TableName,
		schema: &Schema,
		replace: bool,
	) -> Result<(), IngestError> {
		let mut inner = self.inner.lock().unwrap();
		inner.calls.push(StoreCall::Create(table.to_string(), replace));
		if inner.tables.contains_key(table) && !replace {
			return Err(IngestError::store(table, "relation already exists"));
		}
		let created = Table {
			columns: TableColumn::from_schema(schema),
			..Table::default()
		};
		inner.tables.insert(table.clone(), created);
		Ok(())
	}

	async fn append(&self, table: &TableName, batch: &RecordBatch) -> Result<u64, IngestError> {
		let mut inner = self.inner.lock().unwrap();
		inner.calls.push(StoreCall::Append(table.to_string(), batch.num_rows()));
		if let Some(left) = inner.appends_left.as_mut() {
			if *left == 0 {
				return Err(IngestError::store(table, "injected failure"));
			}
			*left -= 1;
		}
		let entry = inner
			.tables
			.get_mut(table)
			.ok_or_else(|| IngestError::store(table, "relation does not exist"))?;
		entry.rows += batch.num_rows();
		entry
			.appended
			.push(batch.schema_ref().fields().iter().map(|f| f.data_type().clone()).collect());
		Ok(batch.num_rows() as u64)
	}
}

/// Batch of `rows` rows with one Int64 column per name.
pub fn int_batch(names: &[&str], rows: usize) -> RecordBatch {
	let fields: Vec<Field> = names
		.iter()
		.map(|n| Field::new(*n, DataType::Int64, true))
		.collect();
	let columns: Vec<ArrayRef> = names
		.iter()
		.map(|_| Arc::new(Int64Array::from_iter_values(0..rows as i64)) as ArrayRef)
		.collect();
	RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap()
}
