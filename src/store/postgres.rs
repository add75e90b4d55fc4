use std::time::Duration;

use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use log::debug;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::sql_types::{PgColumn, SqlType, column_definitions};
use super::{TableColumn, TableName, TableStore, quote_ident};
use crate::error::IngestError;

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;

/// Postgres-backed table store. All statements go through one pooled
/// connection; each create or append runs in its own transaction.
pub struct PgStore {
	pool: PgPool,
}

impl PgStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	/// Connect helper taking a `postgresql://` URL. `label` names the target
	/// in errors, without credentials.
	pub async fn connect(database_url: &str, label: &str) -> Result<Self, IngestError> {
		let pool = PgPoolOptions::new()
			.max_connections(1)
			.acquire_timeout(Duration::from_secs(30))
			.connect(database_url)
			.await
			.map_err(|e| IngestError::store(label, e))?;
		Ok(Self::new(pool))
	}

	/// Lightweight query to verify connectivity.
	pub async fn ping(&self) -> Result<(), IngestError> {
		sqlx::query("SELECT 1")
			.execute(&self.pool)
			.await
			.map_err(|e| IngestError::store("<connection>", e))?;
		Ok(())
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}
}

#[async_trait]
impl TableStore for PgStore {
	async fn table_columns(&self, table: &TableName) -> Result<Option<Vec<TableColumn>>, IngestError> {
		let err = |e: sqlx::Error| IngestError::store(table, e);

		let relation: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
			.bind(table.quoted())
			.fetch_one(&self.pool)
			.await
			.map_err(err)?;
		if relation.is_none() {
			return Ok(None);
		}

		let columns: Vec<(String, String)> = sqlx::query_as(
			"SELECT attname::text, format_type(atttypid, atttypmod) FROM pg_attribute \
			 WHERE attrelid = to_regclass($1) AND attnum > 0 AND NOT attisdropped \
			 ORDER BY attnum",
		)
		.bind(table.quoted())
		.fetch_all(&self.pool)
		.await
		.map_err(err)?;
		Ok(Some(
			columns
				.into_iter()
				.map(|(name, type_name)| {
					let sql_type = SqlType::from_pg(&type_name);
					if sql_type.is_none() {
						debug!("Column '{}' of {} has unmapped type {}", name, table, type_name);
					}
					TableColumn::new(name, sql_type)
				})
				.collect(),
		))
	}

	async fn create_table(
		&self,
		table: &TableName,
		schema: &Schema,
		replace: bool,
	) -> Result<(), IngestError> {
		let columns = column_definitions(schema).map_err(|message| IngestError::SchemaViolation {
			location: table.to_string(),
			message,
		})?;
		let err = |e: sqlx::Error| IngestError::store(table, e);

		let mut tx = self.pool.begin().await.map_err(err)?;
		if replace {
			sqlx::query(&format!("DROP TABLE IF EXISTS {}", table.quoted()))
				.execute(&mut *tx)
				.await
				.map_err(err)?;
		}
		let ddl = format!("CREATE TABLE {} ({})", table.quoted(), columns);
		debug!("{}", ddl);
		sqlx::query(&ddl).execute(&mut *tx).await.map_err(err)?;
		tx.commit().await.map_err(err)?;
		Ok(())
	}

	async fn append(&self, table: &TableName, batch: &RecordBatch) -> Result<u64, IngestError> {
		let schema = batch.schema();
		let columns = schema
			.fields()
			.iter()
			.zip(batch.columns())
			.map(|(f, a)| PgColumn::from_array(f.name(), a))
			.collect::<Result<Vec<_>, _>>()
			.map_err(|message| IngestError::SchemaViolation {
				location: table.to_string(),
				message,
			})?;
		if columns.is_empty() || batch.num_rows() == 0 {
			return Ok(0);
		}

		let insert = format!(
			"INSERT INTO {} ({}) ",
			table.quoted(),
			schema
				.fields()
				.iter()
				.map(|f| quote_ident(f.name()))
				.collect::<Vec<_>>()
				.join(", ")
		);
		let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);
		let err = |e: sqlx::Error| IngestError::store(table, e);

		let mut tx = self.pool.begin().await.map_err(err)?;
		let mut start = 0;
		while start < batch.num_rows() {
			let end = (start + rows_per_statement).min(batch.num_rows());
			let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(&insert);
			qb.push_values(start..end, |mut b, row| {
				for column in &columns {
					column.bind(&mut b, row);
				}
			});
			qb.build().execute(&mut *tx).await.map_err(err)?;
			start = end;
		}
		tx.commit().await.map_err(err)?;
		Ok(batch.num_rows() as u64)
	}
}
