use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

/// Initialize the global logger: one line per record on stderr with a UTC
/// timestamp, colored level and the emitting module.
pub fn init_logging(level: LevelFilter) -> anyhow::Result<()> {
	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::Blue)
		.trace(Color::BrightBlack);

	fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} {:<5} [{}] {}",
				chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level)
		// sqlx logs every statement at info
		.level_for("sqlx", LevelFilter::Warn)
		.chain(std::io::stderr())
		.apply()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}
