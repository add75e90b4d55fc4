use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int32Type, Int64Type, Schema, TimeUnit};
use arrow::error::ArrowError;
use chrono::{DateTime, NaiveDateTime};
use sqlx::Postgres;
use sqlx::query_builder::Separated;

use super::quote_ident;

/// Postgres column type chosen for an Arrow type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
	BigInt,
	Double,
	Boolean,
	Text,
	Timestamp,
}

impl SqlType {
	pub fn for_arrow(data_type: &DataType) -> Option<Self> {
		match data_type {
			DataType::Int8
			| DataType::Int16
			| DataType::Int32
			| DataType::Int64
			| DataType::UInt8
			| DataType::UInt16
			| DataType::UInt32
			| DataType::UInt64 => Some(SqlType::BigInt),
			DataType::Float16
			| DataType::Float32
			| DataType::Float64
			| DataType::Decimal128(..)
			| DataType::Decimal256(..) => Some(SqlType::Double),
			DataType::Boolean => Some(SqlType::Boolean),
			DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View | DataType::Null => {
				Some(SqlType::Text)
			}
			DataType::Timestamp(..) | DataType::Date32 | DataType::Date64 => Some(SqlType::Timestamp),
			DataType::Dictionary(_, value) => Self::for_arrow(value),
			_ => None,
		}
	}

	/// Parse a Postgres type as printed by `format_type`, e.g.
	/// `timestamp(6) without time zone` or `character varying(20)`.
	pub fn from_pg(type_name: &str) -> Option<Self> {
		let base = type_name.split('(').next().unwrap_or_default().trim();
		match base {
			"bigint" | "integer" | "smallint" => Some(SqlType::BigInt),
			"double precision" | "real" | "numeric" => Some(SqlType::Double),
			"boolean" => Some(SqlType::Boolean),
			"text" | "character varying" | "character" => Some(SqlType::Text),
			"timestamp" | "date" => Some(SqlType::Timestamp),
			_ if base.starts_with("timestamp") => Some(SqlType::Timestamp),
			_ => None,
		}
	}

	/// Arrow type that values of this SQL type are held in.
	pub fn arrow_type(&self) -> DataType {
		match self {
			SqlType::BigInt => DataType::Int64,
			SqlType::Double => DataType::Float64,
			SqlType::Boolean => DataType::Boolean,
			SqlType::Text => DataType::Utf8,
			SqlType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
		}
	}

	pub fn as_sql(&self) -> &'static str {
		match self {
			SqlType::BigInt => "BIGINT",
			SqlType::Double => "DOUBLE PRECISION",
			SqlType::Boolean => "BOOLEAN",
			SqlType::Text => "TEXT",
			SqlType::Timestamp => "TIMESTAMP",
		}
	}
}

fn unsupported(name: &str, data_type: &DataType) -> String {
	format!("column '{}' has type {} with no Postgres equivalent", name, data_type)
}

/// Column list for `CREATE TABLE`, e.g. `"vendor_id" BIGINT, "fare_amount" DOUBLE PRECISION`.
pub fn column_definitions(schema: &Schema) -> Result<String, String> {
	let defs = schema
		.fields()
		.iter()
		.map(|f| {
			SqlType::for_arrow(f.data_type())
				.map(|t| format!("{} {}", quote_ident(f.name()), t.as_sql()))
				.ok_or_else(|| unsupported(f.name(), f.data_type()))
		})
		.collect::<Result<Vec<_>, _>>()?;
	Ok(defs.join(", "))
}

/// One batch column converted to the value type bound for its SQL type.
/// Timestamps are held as microseconds since the epoch, UTC.
pub enum PgColumn {
	BigInt(Int64Array),
	Double(Float64Array),
	Boolean(BooleanArray),
	Text(StringArray),
	Timestamp(Int64Array),
}

impl PgColumn {
	pub fn from_array(name: &str, array: &ArrayRef) -> Result<Self, String> {
		let sql_type =
			SqlType::for_arrow(array.data_type()).ok_or_else(|| unsupported(name, array.data_type()))?;
		let convert = |e: ArrowError| format!("column '{}': {}", name, e);

		let array = match array.data_type() {
			DataType::Dictionary(_, value) => cast(array, value).map_err(convert)?,
			_ => array.clone(),
		};
		Ok(match sql_type {
			SqlType::BigInt => PgColumn::BigInt(
				cast(&array, &DataType::Int64)
					.map_err(convert)?
					.as_primitive::<Int64Type>()
					.clone(),
			),
			SqlType::Double => PgColumn::Double(
				cast(&array, &DataType::Float64)
					.map_err(convert)?
					.as_primitive::<Float64Type>()
					.clone(),
			),
			SqlType::Boolean => PgColumn::Boolean(array.as_boolean().clone()),
			SqlType::Text => PgColumn::Text(
				cast(&array, &DataType::Utf8)
					.map_err(convert)?
					.as_string::<i32>()
					.clone(),
			),
			SqlType::Timestamp => PgColumn::Timestamp(timestamp_micros(&array).map_err(convert)?),
		})
	}

	/// Bind the value at `row` as the next placeholder.
	pub fn bind(&self, b: &mut Separated<'_, '_, Postgres, &'static str>, row: usize) {
		match self {
			PgColumn::BigInt(a) => b.push_bind(a.is_valid(row).then(|| a.value(row))),
			PgColumn::Double(a) => b.push_bind(a.is_valid(row).then(|| a.value(row))),
			PgColumn::Boolean(a) => b.push_bind(a.is_valid(row).then(|| a.value(row))),
			PgColumn::Text(a) => b.push_bind(a.is_valid(row).then(|| a.value(row).to_string())),
			PgColumn::Timestamp(a) => b.push_bind(timestamp_at(a, row)),
		};
	}
}

fn timestamp_at(micros: &Int64Array, row: usize) -> Option<NaiveDateTime> {
	if micros.is_null(row) {
		return None;
	}
	DateTime::from_timestamp_micros(micros.value(row)).map(|d| d.naive_utc())
}

/// Microseconds since the epoch. Zoned timestamps are stored as UTC instants,
/// so their raw values are used as-is.
fn timestamp_micros(array: &ArrayRef) -> Result<Int64Array, ArrowError> {
	match array.data_type() {
		DataType::Timestamp(unit, _) => {
			let raw = cast(array, &DataType::Int64)?;
			let raw = raw.as_primitive::<Int64Type>();
			Ok(match unit {
				TimeUnit::Second => raw.unary::<_, Int64Type>(|v| v.saturating_mul(1_000_000)),
				TimeUnit::Millisecond => raw.unary::<_, Int64Type>(|v| v.saturating_mul(1_000)),
				TimeUnit::Microsecond => raw.clone(),
				TimeUnit::Nanosecond => raw.unary::<_, Int64Type>(|v| v.div_euclid(1_000)),
			})
		}
		DataType::Date32 => {
			let days = cast(array, &DataType::Int32)?;
			Ok(days
				.as_primitive::<Int32Type>()
				.unary::<_, Int64Type>(|d| i64::from(d) * 86_400_000_000))
		}
		DataType::Date64 => {
			let millis = cast(array, &DataType::Int64)?;
			Ok(millis
				.as_primitive::<Int64Type>()
				.unary::<_, Int64Type>(|v| v.saturating_mul(1_000)))
		}
		other => Err(ArrowError::CastError(format!("{} is not a timestamp or date", other))),
	}
}
