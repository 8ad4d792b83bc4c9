use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use catalog_relay::app::{MIGRATION_V1, Relay};
use catalog_relay::config::{self, Settings};
use catalog_relay::export::Exporter;
use catalog_relay::import::FromDateImport;
use catalog_relay::mapper::FieldSet;
use catalog_relay::observability::{self, MetricsRegistry};
use catalog_relay::queue::{Job, JobQueue};
use catalog_relay::store::PgStore;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Exit status for a run that should be tried again later (EX_TEMPFAIL).
const EXIT_RETRY: u8 = 75;

#[derive(Parser)]
#[command(name = "relay", about = "catalog-relay - export synchronization with a remote catalog")]
struct Cli {
	/// Extra configuration file layered above the standard locations
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Create the synchronization tables
	Migrate,
	/// Export one binding now
	Export {
		/// Binding model, e.g. magento.product.product
		#[arg(long)]
		model: String,
		/// Binding id
		#[arg(long)]
		binding: i64,
		/// Restrict an update to these local fields (comma separated)
		#[arg(long, value_delimiter = ',')]
		fields: Option<Vec<String>>,
	},
	/// Run jobs read as NDJSON from stdin until EOF or Ctrl-C
	Worker {
		/// Print the metrics exposition on exit
		#[arg(long)]
		metrics_on_exit: bool,
	},
	/// Import the configurable products changed since the last run
	ImportConfigurables,
	/// Print the metrics exposition with every series at its initial value
	Metrics,
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	let settings = match config::load_with(cli.config.as_deref()) {
		Ok(s) => s,
		Err(e) => {
			eprintln!("failed to load config: {}", e);
			return ExitCode::FAILURE;
		}
	};

	let obs = match observability::init_observability(settings.log_level.to_level_filter()) {
		Ok(obs) => obs,
		Err(e) => {
			eprintln!("failed to initialize observability: {}", e);
			return ExitCode::FAILURE;
		}
	};

	let result = match cli.command {
		Commands::Migrate => migrate(&settings).await.map(|()| ExitCode::SUCCESS),
		Commands::Export {
			model,
			binding,
			fields,
		} => export(&settings, obs.metrics, &model, binding, fields).await,
		Commands::Worker { metrics_on_exit } => worker(&settings, obs.metrics, metrics_on_exit)
			.await
			.map(|()| ExitCode::SUCCESS),
		Commands::ImportConfigurables => import_configurables(&settings, obs.metrics)
			.await
			.map(|()| ExitCode::SUCCESS),
		Commands::Metrics => MetricsRegistry::new()
			.map(|m| print!("{}", m.encode()))
			.map(|()| ExitCode::SUCCESS)
			.map_err(anyhow::Error::from),
	};

	match result {
		Ok(code) => code,
		Err(e) => {
			error!("{:#}", e);
			ExitCode::FAILURE
		}
	}
}

async fn migrate(settings: &Settings) -> anyhow::Result<()> {
	let store = PgStore::connect(&settings.database_url)
		.await
		.context("failed to connect to the database")?;
	store.apply_migration(MIGRATION_V1).await?;
	info!("synchronization tables are up to date");
	Ok(())
}

async fn export(
	settings: &Settings,
	metrics: std::sync::Arc<MetricsRegistry>,
	model: &str,
	binding: i64,
	fields: Option<Vec<String>>,
) -> anyhow::Result<ExitCode> {
	let relay = Relay::start(settings, metrics).await?;
	let fields: Option<FieldSet> = fields.map(|f| f.into_iter().collect());

	let exporter = Exporter::new(std::sync::Arc::clone(&relay.env), model)?;
	let code = match exporter.run(binding, fields).await {
		Ok(outcome) => {
			println!("{}", outcome);
			ExitCode::SUCCESS
		}
		Err(e) if e.is_retryable() => {
			warn!("{}", e);
			ExitCode::from(EXIT_RETRY)
		}
		Err(e) => {
			error!("{} #{}: {}", model, binding, e);
			ExitCode::FAILURE
		}
	};

	// Imports scheduled by the export run before exiting.
	relay.pool.wait_idle().await;
	relay.pool.shutdown().await;
	Ok(code)
}

async fn import_configurables(
	settings: &Settings,
	metrics: std::sync::Arc<MetricsRegistry>,
) -> anyhow::Result<()> {
	let relay = Relay::start(settings, metrics).await?;
	let report = FromDateImport::configurables()
		.run(&relay.env, settings.import_configurables_from_date)
		.await?;
	println!("{} import(s) scheduled", report.scheduled);

	relay.pool.wait_idle().await;
	relay.pool.shutdown().await;
	Ok(())
}

async fn worker(
	settings: &Settings,
	metrics: std::sync::Arc<MetricsRegistry>,
	metrics_on_exit: bool,
) -> anyhow::Result<()> {
	let relay = Relay::start(settings, std::sync::Arc::clone(&metrics)).await?;
	let queue = relay.pool.queue().clone();

	let feed = async {
		let mut lines = BufReader::new(tokio::io::stdin()).lines();
		while let Some(line) = lines.next_line().await? {
			let line = line.trim();
			if line.is_empty() {
				continue;
			}
			match serde_json::from_str::<Job>(line) {
				Ok(job) => queue.enqueue(job).await?,
				Err(e) => warn!("ignoring malformed job line: {}", e),
			}
		}
		queue.wait_idle().await;
		anyhow::Ok(())
	};

	tokio::select! {
		res = feed => res?,
		_ = tokio::signal::ctrl_c() => info!("interrupted, stopping workers"),
	}

	relay.pool.shutdown().await;
	if metrics_on_exit {
		print!("{}", metrics.encode());
	}
	Ok(())
}
