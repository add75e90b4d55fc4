//! Static column tables: the dtypes enforced when reading raw CSV files and
//! the canonical trip schema that normalization maps onto.

use arrow::datatypes::{DataType, TimeUnit};

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
	Integer,
	Float,
	Text,
	Timestamp,
}

impl ColumnKind {
	/// Arrow type a column of this kind is read into. All are nullable.
	pub fn data_type(&self) -> DataType {
		match self {
			ColumnKind::Integer => DataType::Int64,
			ColumnKind::Float => DataType::Float64,
			ColumnKind::Text => DataType::Utf8,
			ColumnKind::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
		}
	}
}

/// Declared types of raw CSV columns. Columns not listed here are read as text.
pub static TRIP_DTYPES: &[(&str, ColumnKind)] = &[
	("VendorID", ColumnKind::Integer),
	("passenger_count", ColumnKind::Integer),
	("trip_distance", ColumnKind::Float),
	("RatecodeID", ColumnKind::Integer),
	("store_and_fwd_flag", ColumnKind::Text),
	("PULocationID", ColumnKind::Integer),
	("DOLocationID", ColumnKind::Integer),
	("payment_type", ColumnKind::Integer),
	("fare_amount", ColumnKind::Float),
	("extra", ColumnKind::Float),
	("mta_tax", ColumnKind::Float),
	("tip_amount", ColumnKind::Float),
	("tolls_amount", ColumnKind::Float),
	("ehail_fee", ColumnKind::Float),
	("improvement_surcharge", ColumnKind::Float),
	("total_amount", ColumnKind::Float),
	("trip_type", ColumnKind::Integer),
	("congestion_surcharge", ColumnKind::Float),
	("tpep_pickup_datetime", ColumnKind::Timestamp),
	("tpep_dropoff_datetime", ColumnKind::Timestamp),
	("lpep_pickup_datetime", ColumnKind::Timestamp),
	("lpep_dropoff_datetime", ColumnKind::Timestamp),
];

/// Declared kind of a raw column, matched case-insensitively.
pub fn declared_kind(dtypes: &[(&str, ColumnKind)], column: &str) -> Option<ColumnKind> {
	dtypes
		.iter()
		.find(|(name, _)| name.eq_ignore_ascii_case(column))
		.map(|(_, kind)| *kind)
}

/// One output column of the canonical schema.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalField {
	pub name: &'static str,
	pub kind: ColumnKind,
	/// Raw names accepted for this field, lowercase, in priority order.
	pub candidates: &'static [&'static str],
}

const fn field(
	name: &'static str,
	kind: ColumnKind,
	candidates: &'static [&'static str],
) -> CanonicalField {
	CanonicalField {
		name,
		kind,
		candidates,
	}
}

/// Lineage column holding the run start time.
pub const EXTRACTED_AT: &str = "extracted_at";
/// Lineage column holding the taxi service type.
pub const SERVICE_TYPE: &str = "service_type";

/// Canonical trip schema. Candidate lists are pairwise disjoint.
pub static TRIP_SCHEMA: &[CanonicalField] = &[
	field("vendor_id", ColumnKind::Integer, &["vendorid", "vendor_id"]),
	field(
		"pickup_datetime",
		ColumnKind::Timestamp,
		&["lpep_pickup_datetime", "tpep_pickup_datetime", "pickup_datetime"],
	),
	field(
		"dropoff_datetime",
		ColumnKind::Timestamp,
		&["lpep_dropoff_datetime", "tpep_dropoff_datetime", "dropoff_datetime"],
	),
	field(
		"store_and_fwd_flag",
		ColumnKind::Text,
		&["store_and_fwd_flag", "store_and_fwd"],
	),
	field(
		"rate_code_id",
		ColumnKind::Integer,
		&["ratecodeid", "rate_code_id", "ratecode_id"],
	),
	field(
		"pickup_location_id",
		ColumnKind::Integer,
		&["pulocationid", "pu_location_id", "pickup_location_id"],
	),
	field(
		"dropoff_location_id",
		ColumnKind::Integer,
		&["dolocationid", "do_location_id", "dropoff_location_id"],
	),
	field(
		"passenger_count",
		ColumnKind::Integer,
		&["passengercount", "passenger_count"],
	),
	field("trip_distance", ColumnKind::Float, &["trip_distance", "tripdistance"]),
	field("fare_amount", ColumnKind::Float, &["fare_amount", "fareamount"]),
	field("extra", ColumnKind::Float, &["extra"]),
	field("mta_tax", ColumnKind::Float, &["mta_tax", "mtatax"]),
	field("tip_amount", ColumnKind::Float, &["tip_amount", "tipamount"]),
	field("tolls_amount", ColumnKind::Float, &["tolls_amount", "tollsamount"]),
	field("ehail_fee", ColumnKind::Float, &["ehail_fee"]),
	field(
		"improvement_surcharge",
		ColumnKind::Float,
		&["improvement_surcharge"],
	),
	field("total_amount", ColumnKind::Float, &["total_amount", "total_amounts"]),
	field(
		"payment_type",
		ColumnKind::Integer,
		&["payment_type", "payment_type_id", "paymenttype", "paymenttypeid"],
	),
	field("trip_type", ColumnKind::Integer, &["trip_type", "triptype"]),
	field(
		"congestion_surcharge",
		ColumnKind::Float,
		&["congestion_surcharge"],
	),
	field(EXTRACTED_AT, ColumnKind::Timestamp, &[]),
	field(SERVICE_TYPE, ColumnKind::Text, &[]),
];
