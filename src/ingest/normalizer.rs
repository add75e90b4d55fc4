use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use log::warn;

use crate::error::IngestError;
use crate::ingest::schema::{
	CanonicalField, ColumnKind, EXTRACTED_AT, SERVICE_TYPE, TRIP_SCHEMA,
};
use crate::source::remote::ServiceType;

/// Column renames computed for one raw column set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenamePlan {
	/// Column index -> canonical name.
	pub renames: BTreeMap<usize, &'static str>,
	/// Columns removed because they would duplicate a canonical name.
	pub dropped: Vec<usize>,
}

/// Maps vendor-specific raw column names onto a canonical schema.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
	fields: &'static [CanonicalField],
}

impl Default for Normalizer {
	fn default() -> Self {
		Self::new(TRIP_SCHEMA)
	}
}

impl Normalizer {
	pub fn new(fields: &'static [CanonicalField]) -> Self {
		Self { fields }
	}

	/// Decide the renames for a set of raw column names.
	///
	/// For each canonical field the first candidate equal (ignoring case) to
	/// an existing column wins. Where several raw columns share a lowercase
	/// form only the first in column order is considered. Columns matched by
	/// no candidate keep their name.
	pub fn plan<S: AsRef<str>>(&self, columns: &[S]) -> RenamePlan {
		let mut by_lower: HashMap<String, usize> = HashMap::new();
		for (idx, name) in columns.iter().enumerate() {
			by_lower.entry(name.as_ref().to_lowercase()).or_insert(idx);
		}

		let mut plan = RenamePlan::default();
		for field in self.fields {
			if let Some(idx) = field
				.candidates
				.iter()
				.find_map(|cand| by_lower.get(*cand).copied())
			{
				plan.renames.insert(idx, field.name);
			}
		}

		for (idx, name) in columns.iter().enumerate() {
			let name = name.as_ref();
			if !plan.renames.contains_key(&idx) && plan.renames.values().any(|c| *c == name) {
				plan.dropped.push(idx);
			}
		}
		plan
	}

	/// Rename the columns of `batch` according to [`Normalizer::plan`].
	pub fn normalize(&self, batch: &RecordBatch) -> Result<RecordBatch, IngestError> {
		let schema = batch.schema();
		let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
		let plan = self.plan(&names);
		if plan.renames.iter().all(|(idx, name)| names[*idx] == *name) && plan.dropped.is_empty() {
			return Ok(batch.clone());
		}

		let mut fields: Vec<Field> = Vec::with_capacity(names.len());
		let mut columns: Vec<ArrayRef> = Vec::with_capacity(names.len());
		for (idx, field) in schema.fields().iter().enumerate() {
			if plan.dropped.contains(&idx) {
				warn!(
					"Dropping column '{}': '{}' already maps to the same canonical column",
					field.name(),
					plan.renames
						.iter()
						.find(|(_, c)| **c == field.name().as_str())
						.map(|(i, _)| names[*i])
						.unwrap_or_default()
				);
				continue;
			}
			let renamed = match plan.renames.get(&idx) {
				Some(canonical) => field.as_ref().clone().with_name(*canonical),
				None => field.as_ref().clone(),
			};
			fields.push(renamed);
			columns.push(batch.column(idx).clone());
		}

		rebuild(batch, fields, columns)
	}

	/// Canonical kind of a column name, if it is part of the schema.
	pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
		self.fields.iter().find(|f| f.name == name).map(|f| f.kind)
	}
}

/// Append the lineage columns: `extracted_at` always, `service_type` when
/// known. Existing columns of the same name are replaced.
pub fn with_lineage(
	batch: &RecordBatch,
	extracted_at: DateTime<Utc>,
	service: Option<ServiceType>,
) -> Result<RecordBatch, IngestError> {
	let n = batch.num_rows();
	let mut added: Vec<(Field, ArrayRef)> = vec![(
		Field::new(EXTRACTED_AT, ColumnKind::Timestamp.data_type(), true),
		Arc::new(TimestampMicrosecondArray::from_value(
			extracted_at.timestamp_micros(),
			n,
		)) as ArrayRef,
	)];
	if let Some(service) = service {
		added.push((
			Field::new(SERVICE_TYPE, ColumnKind::Text.data_type(), true),
			Arc::new(StringArray::from(vec![service.as_str(); n])) as ArrayRef,
		));
	}

	let schema = batch.schema();
	let mut fields: Vec<Field> = Vec::with_capacity(schema.fields().len() + added.len());
	let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.capacity());
	for (idx, field) in schema.fields().iter().enumerate() {
		if added.iter().any(|(f, _)| f.name() == field.name()) {
			continue;
		}
		fields.push(field.as_ref().clone());
		columns.push(batch.column(idx).clone());
	}
	for (field, column) in added {
		fields.push(field);
		columns.push(column);
	}

	rebuild(batch, fields, columns)
}

fn rebuild(
	batch: &RecordBatch,
	fields: Vec<Field>,
	columns: Vec<ArrayRef>,
) -> Result<RecordBatch, IngestError> {
	let schema = Schema::new_with_metadata(fields, batch.schema().metadata().clone());
	RecordBatch::try_new(Arc::new(schema), columns).map_err(|e| IngestError::SchemaViolation {
		location: "normalized batch".to_string(),
		message: e.to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use arrow::array::{Array, AsArray, Int64Array};
	use arrow::datatypes::{DataType, TimestampMicrosecondType};

	fn batch_with(names: &[&str]) -> RecordBatch {
		let fields: Vec<Field> = names
			.iter()
			.map(|n| Field::new(*n, DataType::Int64, true))
			.collect();
		let columns: Vec<ArrayRef> = (0..names.len())
			.map(|i| Arc::new(Int64Array::from(vec![i as i64, i as i64])) as ArrayRef)
			.collect();
		RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap()
	}

	fn column_names(batch: &RecordBatch) -> Vec<String> {
		batch
			.schema()
			.fields()
			.iter()
			.map(|f| f.name().clone())
			.collect()
	}

	#[test]
	fn renames_case_insensitively() {
		let batch = batch_with(&[
			"VendorID",
			"lpep_pickup_datetime",
			"PULocationID",
			"DOLocationID",
			"RatecodeID",
			"airport_fee",
		]);
		let out = Normalizer::default().normalize(&batch).unwrap();
		assert_eq!(
			column_names(&out),
			[
				"vendor_id",
				"pickup_datetime",
				"pickup_location_id",
				"dropoff_location_id",
				"rate_code_id",
				"airport_fee",
			]
		);
		assert_eq!(out.num_rows(), 2);
	}

	#[test]
	fn earlier_candidate_wins() {
		// Both spellings present: `vendorid` is listed first for vendor_id.
		let batch = batch_with(&["vendor_id", "VendorID"]);
		let n = Normalizer::default();
		let plan = n.plan(&["vendor_id", "VendorID"]);
		assert_eq!(plan.renames.get(&1), Some(&"vendor_id"));
		assert_eq!(plan.dropped, vec![0]);

		let out = n.normalize(&batch).unwrap();
		assert_eq!(column_names(&out), ["vendor_id"]);
		// The surviving values come from the `VendorID` column.
		assert_eq!(out.column(0).as_primitive::<arrow::datatypes::Int64Type>().value(0), 1);
	}

	#[test]
	fn plan_is_deterministic_and_order_independent_per_field() {
		let n = Normalizer::default();
		let a = n.plan(&["tpep_pickup_datetime", "lpep_pickup_datetime"]);
		let b = n.plan(&["tpep_pickup_datetime", "lpep_pickup_datetime"]);
		assert_eq!(a, b);
		assert_eq!(a.renames.get(&1), Some(&"pickup_datetime"));
	}

	#[test]
	fn unmatched_canonical_fields_stay_absent() {
		let batch = batch_with(&["fare_amount"]);
		let out = Normalizer::default().normalize(&batch).unwrap();
		assert_eq!(column_names(&out), ["fare_amount"]);
		assert!(out.schema().field_with_name("ehail_fee").is_err());
	}

	#[test]
	fn duplicate_lowercase_raw_columns_keep_first() {
		let plan = Normalizer::default().plan(&["PassengerCount", "passengercount"]);
		assert_eq!(plan.renames.get(&0), Some(&"passenger_count"));
		assert!(plan.dropped.is_empty());
	}

	#[test]
	fn lineage_columns_are_appended() {
		let batch = batch_with(&["vendor_id", "service_type"]);
		let at = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
			.unwrap()
			.with_timezone(&Utc);
		let out = with_lineage(&batch, at, Some(ServiceType::Green)).unwrap();
		assert_eq!(column_names(&out), ["vendor_id", "extracted_at", "service_type"]);

		let ts = out
			.column_by_name("extracted_at")
			.unwrap()
			.as_primitive::<TimestampMicrosecondType>();
		assert_eq!(ts.len(), 2);
		assert_eq!(ts.value(1), at.timestamp_micros());

		let svc = out.column_by_name("service_type").unwrap().as_string::<i32>();
		assert_eq!(svc.value(0), "green");
	}

	#[test]
	fn lineage_without_service() {
		let batch = batch_with(&["vendor_id"]);
		let out = with_lineage(&batch, Utc::now(), None).unwrap();
		assert_eq!(column_names(&out), ["vendor_id", "extracted_at"]);
	}
}
