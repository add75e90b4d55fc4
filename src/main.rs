use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::{error, warn};
use tlc_ingest::config::{self, Settings, Target};
use tlc_ingest::error::IngestError;
use tlc_ingest::observability;
use tlc_ingest::source::remote::{Feed, MonthRef, ServiceType};
use tlc_ingest::source::{self, SourceOptions};
use tlc_ingest::store::IfExists;

#[derive(Parser)]
#[command(
	name = "tlc-ingest",
	version,
	about = "Load NYC TLC trip data into Postgres or a local Parquet store"
)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
	/// Log level (error, warn, info, debug, trace)
	#[arg(long, global = true)]
	log_level: Option<log::Level>,
}

#[derive(Subcommand)]
enum Commands {
	/// Read every resolved location and write it to the destination table
	Ingest(IngestArgs),
	/// Print the resolved input locations without reading or writing anything
	Resolve(SourceArgs),
}

#[derive(Args)]
struct SourceArgs {
	/// Local file path or glob pattern; repeatable
	#[arg(short = 'f', long = "file", value_name = "PATH")]
	files: Vec<String>,
	/// Year of the monthly file to download
	#[arg(short, long)]
	year: Option<i32>,
	/// Month (1-12) of the monthly file to download
	#[arg(short, long)]
	month: Option<u32>,
	/// Last month of a range starting at --year/--month
	#[arg(long, value_name = "YYYY-MM")]
	through: Option<MonthRef>,
	/// Taxi service type; repeatable
	#[arg(long = "service", value_enum)]
	services: Vec<ServiceType>,
	/// Remote feed used for --year/--month
	#[arg(long, value_enum)]
	feed: Option<Feed>,
	/// Explicit URL of one remote file
	#[arg(long)]
	url: Option<String>,
}

impl SourceArgs {
	fn options(&self, settings: &Settings) -> SourceOptions {
		SourceOptions {
			files: self.files.clone(),
			url: self.url.clone(),
			year: self.year,
			month: self.month,
			through: self.through,
			services: if self.services.is_empty() {
				settings.services.clone()
			} else {
				self.services.clone()
			},
			feed: self.feed.unwrap_or(settings.feed),
		}
	}
}

#[derive(Args)]
struct IngestArgs {
	#[command(flatten)]
	source: SourceArgs,
	#[arg(long)]
	pg_user: Option<String>,
	#[arg(long, env = "PGPASSWORD", hide_env_values = true)]
	pg_pass: Option<String>,
	#[arg(long)]
	pg_host: Option<String>,
	#[arg(long)]
	pg_port: Option<u16>,
	#[arg(long)]
	pg_db: Option<String>,
	/// Rows per CSV batch
	#[arg(long)]
	chunksize: Option<usize>,
	/// Destination table, optionally `schema.table`; `{service_type}` is substituted
	#[arg(long)]
	table: Option<String>,
	#[arg(long, value_enum)]
	if_exists: Option<IfExists>,
	#[arg(long, value_enum)]
	target: Option<Target>,
	/// Root directory of the Parquet store
	#[arg(long)]
	out_dir: Option<PathBuf>,
	/// Download cache for remote files
	#[arg(long)]
	cache_dir: Option<PathBuf>,
	/// Rename columns to the canonical schema and add lineage columns
	#[arg(long)]
	normalize: bool,
	/// Write Prometheus text metrics here when the run ends
	#[arg(long)]
	metrics_file: Option<PathBuf>,
}

impl IngestArgs {
	fn apply(&self, settings: &mut Settings) {
		if let Some(v) = &self.pg_user {
			settings.pg_user = v.clone();
		}
		if let Some(v) = &self.pg_pass {
			settings.pg_pass = v.clone();
		}
		if let Some(v) = &self.pg_host {
			settings.pg_host = v.clone();
		}
		if let Some(v) = self.pg_port {
			settings.pg_port = v;
		}
		if let Some(v) = &self.pg_db {
			settings.pg_db = v.clone();
		}
		if let Some(v) = self.chunksize {
			settings.chunksize = v;
		}
		if let Some(v) = &self.table {
			settings.table = v.clone();
		}
		if let Some(v) = self.if_exists {
			settings.if_exists = v;
		}
		if let Some(v) = self.target {
			settings.target = v;
		}
		if let Some(v) = &self.out_dir {
			settings.out_dir = v.clone();
		}
		if let Some(v) = &self.cache_dir {
			settings.cache_dir = v.clone();
		}
		if self.normalize {
			settings.normalize = true;
		}
	}
}

fn fail(e: &IngestError) -> ExitCode {
	error!("{}", e);
	ExitCode::from(e.exit_code())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	let mut settings = match config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("Failed to load configuration: {}", e);
			return ExitCode::from(IngestError::from(e).exit_code());
		}
	};
	if let Some(level) = cli.log_level {
		settings.log_level = level;
	}

	let metrics = match observability::init_observability(settings.log_level.to_level_filter()) {
		Ok(m) => m,
		Err(e) => {
			eprintln!("Failed to initialize observability: {}", e);
			return ExitCode::FAILURE;
		}
	};

	match cli.command {
		Commands::Resolve(args) => {
			let locations = args
				.options(&settings)
				.into_request()
				.and_then(|request| source::resolve(&request));
			match locations {
				Ok(locations) => {
					for location in locations {
						println!("{}", location);
					}
					ExitCode::SUCCESS
				}
				Err(e) => fail(&e),
			}
		}
		Commands::Ingest(args) => {
			args.apply(&mut settings);
			let result = match settings
				.validate()
				.map_err(IngestError::from)
				.and_then(|_| args.source.options(&settings).into_request())
			{
				Ok(request) => tlc_ingest::run(&settings, &request, metrics.clone()).await,
				Err(e) => Err(e),
			};
			if result.is_err() {
				metrics.errors_total.inc();
			}

			if let Some(path) = &args.metrics_file {
				if let Err(e) = metrics.write_to(path) {
					warn!("Failed to write metrics to {}: {}", path.display(), e);
				}
			}

			match result {
				Ok(_) => ExitCode::SUCCESS,
				Err(e) => fail(&e),
			}
		}
	}
}
