//! Remote TLC trip-data feeds: service types, month references and the fixed
//! URL templates used when a run is requested by year/month.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use url::Url;

use crate::error::IngestError;

/// Base of the official monthly Parquet feed.
pub const PARQUET_BASE_URL: &str = "https://d37ci6vzurychx.cloudfront.net/trip-data";
/// Base of the GitHub-release mirror serving `.csv.gz` files.
pub const CSV_BASE_URL: &str = "https://github.com/DataTalksClub/nyc-tlc-data/releases/download";

/// Taxi service type, as used in the TLC file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
	Yellow,
	Green,
	Fhv,
	Fhvhv,
}

impl ServiceType {
	pub fn as_str(&self) -> &'static str {
		match self {
			ServiceType::Yellow => "yellow",
			ServiceType::Green => "green",
			ServiceType::Fhv => "fhv",
			ServiceType::Fhvhv => "fhvhv",
		}
	}
}

impl fmt::Display for ServiceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ServiceType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"yellow" => Ok(ServiceType::Yellow),
			"green" => Ok(ServiceType::Green),
			"fhv" => Ok(ServiceType::Fhv),
			"fhvhv" => Ok(ServiceType::Fhvhv),
			other => Err(format!("unknown service type '{}'", other)),
		}
	}
}

/// Which remote feed a year/month request is built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Feed {
	Parquet,
	Csv,
}

/// Years accepted for a month reference.
pub const YEARS: std::ops::RangeInclusive<i32> = 1900..=9999;

/// A calendar month, `1..=12`, in a year within [`YEARS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonthRef {
	pub year: i32,
	pub month: u32,
}

impl MonthRef {
	pub fn new(year: i32, month: u32) -> Result<Self, IngestError> {
		if !(1..=12).contains(&month) {
			return Err(IngestError::Configuration(format!(
				"month must be between 1 and 12, got {}",
				month
			)));
		}
		if !YEARS.contains(&year) {
			return Err(IngestError::Configuration(format!(
				"year must be between {} and {}, got {}",
				YEARS.start(),
				YEARS.end(),
				year
			)));
		}
		Ok(Self { year, month })
	}

	pub fn succ(self) -> Self {
		if self.month == 12 {
			Self {
				year: self.year + 1,
				month: 1,
			}
		} else {
			Self {
				year: self.year,
				month: self.month + 1,
			}
		}
	}
}

impl fmt::Display for MonthRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}-{:02}", self.year, self.month)
	}
}

impl FromStr for MonthRef {
	type Err = String;

	/// Parses `YYYY-MM`.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (y, m) = s
			.split_once('-')
			.ok_or_else(|| format!("expected YYYY-MM, got '{}'", s))?;
		let year = y
			.parse::<i32>()
			.map_err(|_| format!("invalid year in '{}'", s))?;
		let month = m
			.parse::<u32>()
			.map_err(|_| format!("invalid month in '{}'", s))?;
		MonthRef::new(year, month).map_err(|e| e.to_string())
	}
}

/// Every month from `start` to `end`, both inclusive.
pub fn months_between(start: MonthRef, end: MonthRef) -> Result<Vec<MonthRef>, IngestError> {
	if end < start {
		return Err(IngestError::Configuration(format!(
			"end month {} is before start month {}",
			end, start
		)));
	}
	let mut out = Vec::new();
	let mut cur = start;
	while cur <= end {
		out.push(cur);
		cur = cur.succ();
	}
	Ok(out)
}

/// File name the TLC uses for one service type and month.
pub fn trip_data_file_name(feed: Feed, service: ServiceType, month: MonthRef) -> String {
	let ext = match feed {
		Feed::Parquet => "parquet",
		Feed::Csv => "csv.gz",
	};
	format!("{}_tripdata_{}.{}", service, month, ext)
}

/// Canonical download URL for one service type and month.
pub fn trip_data_url(feed: Feed, service: ServiceType, month: MonthRef) -> Result<Url, IngestError> {
	let file = trip_data_file_name(feed, service, month);
	let raw = match feed {
		Feed::Parquet => format!("{}/{}", PARQUET_BASE_URL, file),
		Feed::Csv => format!("{}/{}/{}", CSV_BASE_URL, service, file),
	};
	Url::parse(&raw).map_err(|e| IngestError::Configuration(format!("bad URL '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parquet_url_follows_template() {
		let url = trip_data_url(
			Feed::Parquet,
			ServiceType::Green,
			MonthRef::new(2025, 11).unwrap(),
		)
		.unwrap();
		assert_eq!(
			url.as_str(),
			"https://d37ci6vzurychx.cloudfront.net/trip-data/green_tripdata_2025-11.parquet"
		);
	}

	#[test]
	fn csv_url_pads_month() {
		let url = trip_data_url(Feed::Csv, ServiceType::Yellow, MonthRef::new(2021, 1).unwrap())
			.unwrap();
		assert_eq!(
			url.as_str(),
			"https://github.com/DataTalksClub/nyc-tlc-data/releases/download/yellow/yellow_tripdata_2021-01.csv.gz"
		);
	}

	#[test]
	fn months_cross_year_boundary() {
		let months = months_between("2020-11".parse().unwrap(), "2021-02".parse().unwrap())
			.unwrap();
		let shown: Vec<String> = months.iter().map(|m| m.to_string()).collect();
		assert_eq!(shown, ["2020-11", "2020-12", "2021-01", "2021-02"]);
	}

	#[test]
	fn reversed_range_is_rejected() {
		let err = months_between("2021-03".parse().unwrap(), "2021-01".parse().unwrap())
			.unwrap_err();
		assert!(matches!(err, IngestError::Configuration(_)));
	}

	#[test]
	fn month_out_of_range() {
		assert!(MonthRef::new(2021, 13).is_err());
		assert!(MonthRef::new(2021, 0).is_err());
		assert!("2021-1x".parse::<MonthRef>().is_err());
	}

	#[test]
	fn year_out_of_range() {
		assert!(MonthRef::new(i32::MAX, 12).is_err());
		assert!(MonthRef::new(1899, 1).is_err());
		let last = MonthRef::new(9999, 12).unwrap();
		assert_eq!(months_between(last, last).unwrap(), vec![last]);
	}

	#[test]
	fn service_type_parses_case_insensitively() {
		assert_eq!("FHVHV".parse::<ServiceType>(), Ok(ServiceType::Fhvhv));
		assert!("blue".parse::<ServiceType>().is_err());
	}
}
