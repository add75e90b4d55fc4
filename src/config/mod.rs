use std::path::PathBuf;

use log::Level;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use url::Url;

use crate::source::remote::{Feed, ServiceType};
use crate::store::IfExists;

/// Which store the loader writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Target {
	Postgres,
	Parquet,
}

/// Runtime configuration for a run.
///
/// Values are loaded from (in order): the `/etc/tlc-ingest/config.json` file,
/// the same file name in the user config folder (both optional), and
/// environment variables prefixed with `TLC_` (e.g. `TLC_PG_HOST`). CLI flags
/// are applied on top by the binary.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Settings {
	pub pg_user: String,
	pub pg_pass: String,
	pub pg_host: String,
	pub pg_port: u16,
	pub pg_db: String,
	/// Rows per CSV batch
	pub chunksize: usize,
	/// Destination table, optionally schema-qualified; may contain `{service_type}`
	pub table: String,
	pub if_exists: IfExists,
	pub target: Target,
	/// Root directory of the Parquet store
	pub out_dir: PathBuf,
	/// Download cache for remote sources
	pub cache_dir: PathBuf,
	pub services: Vec<ServiceType>,
	pub feed: Feed,
	pub normalize: bool,
	#[serde(deserialize_with = "level_from_str")]
	pub log_level: Level,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			pg_user: "root".to_string(),
			pg_pass: "root".to_string(),
			pg_host: "localhost".to_string(),
			pg_port: 5432,
			pg_db: "ny_taxi".to_string(),
			chunksize: 100_000,
			table: "yellow_taxi_data".to_string(),
			if_exists: IfExists::Append,
			target: Target::Postgres,
			out_dir: PathBuf::from("warehouse"),
			cache_dir: PathBuf::from("data"),
			services: vec![ServiceType::Yellow],
			feed: Feed::Parquet,
			normalize: false,
			log_level: Level::Info,
		}
	}
}

/// Accepts any casing, e.g. `debug` or `WARN`.
fn level_from_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
	let raw = String::deserialize(deserializer)?;
	raw.parse::<Level>().map_err(serde::de::Error::custom)
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),
	#[error("invalid setting `{key}`: {reason}")]
	Invalid { key: &'static str, reason: String },
}

impl Settings {
	/// Reject values that would make a run meaningless.
	pub fn validate(&self) -> Result<(), SettingsError> {
		if self.chunksize == 0 {
			return Err(SettingsError::Invalid {
				key: "chunksize",
				reason: "must be a positive integer".to_string(),
			});
		}
		if self.table.trim().is_empty() {
			return Err(SettingsError::Invalid {
				key: "table",
				reason: "must not be empty".to_string(),
			});
		}
		if self.services.is_empty() {
			return Err(SettingsError::Invalid {
				key: "services",
				reason: "at least one service type is required".to_string(),
			});
		}
		Ok(())
	}

	/// Postgres connection URL; user and password are percent-encoded.
	pub fn database_url(&self) -> Result<Url, SettingsError> {
		let invalid = |key: &'static str, reason: &str| SettingsError::Invalid {
			key,
			reason: reason.to_string(),
		};

		let mut url = Url::parse("postgresql://localhost/")
			.map_err(|e| invalid("pg_host", &e.to_string()))?;
		url.set_host(Some(&self.pg_host))
			.map_err(|e| invalid("pg_host", &e.to_string()))?;
		url.set_port(Some(self.pg_port))
			.map_err(|_| invalid("pg_port", "cannot carry a port"))?;
		url.set_username(&self.pg_user)
			.map_err(|_| invalid("pg_user", "cannot carry a user name"))?;
		url.set_password(Some(&self.pg_pass))
			.map_err(|_| invalid("pg_pass", "cannot carry a password"))?;
		url.set_path(&self.pg_db);
		Ok(url)
	}

	/// Connection target with the password elided, for log lines.
	pub fn redacted_target(&self) -> String {
		format!(
			"{}@{}:{}/{}",
			self.pg_user, self.pg_host, self.pg_port, self.pg_db
		)
	}
}

pub fn load() -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/tlc-ingest/config.json").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("tlc-ingest").join("config.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}

	builder = builder.add_source(
		config::Environment::with_prefix("TLC")
			.try_parsing(true)
			.list_separator(",")
			.with_list_parse_key("services"),
	);

	let settings: Settings = builder.build()?.try_deserialize()?;
	settings.validate()?;
	Ok(settings)
}
