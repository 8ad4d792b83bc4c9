use log::LevelFilter;

/// Initialize logging to stderr: `timestamp [LEVEL] target: message`.
///
/// `sqlx` and `reqwest` are capped at `warn` so query and connection chatter does
/// not drown job logs.
pub fn init_logging(level: LevelFilter) -> anyhow::Result<()> {
	fern::Dispatch::new()
		.format(|out, message, record| {
			out.finish(format_args!(
				"{} [{}] {}: {}",
				chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
				record.level(),
				record.target(),
				message
			))
		})
		.level(level)
		.level_for("sqlx", level.min(LevelFilter::Warn))
		.level_for("reqwest", level.min(LevelFilter::Warn))
		.level_for("hyper", LevelFilter::Warn)
		.chain(std::io::stderr())
		.apply()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn logging_initialization() {
		// A logger can be installed once per process; a second call must fail cleanly.
		let _ = init_logging(LevelFilter::Debug);
		assert!(init_logging(LevelFilter::Debug).is_err());
	}
}
