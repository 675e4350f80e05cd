//! RDW Ingest - bulk loader for the RDW vehicle export

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressBar;
use rdw_common::env;
use rdw_common::logging::{init_logging, LogConfig, LogLevel};
use rdw_ingest::config::IngestConfig;
use rdw_ingest::pipeline;
use rdw_ingest::progress::records_spinner;
use rdw_ingest::schema::TableSchema;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rdw-ingest")]
#[command(author, version, about = "Load the RDW vehicle export into PostgreSQL")]
struct Cli {
    /// CSV file to load (overrides RDW_SOURCE_PATH)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// TOML column mapping (overrides RDW_SCHEMA_PATH)
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Rows per transaction
    #[arg(long)]
    batch_size: Option<usize>,

    /// Batches committed at the same time
    #[arg(long)]
    max_concurrent_batches: Option<usize>,

    /// Treat the first line as data
    #[arg(long)]
    no_header_skip: bool,

    /// Show a spinner with the number of records read
    #[arg(long)]
    progress: bool,

    /// Decode and batch the file without touching the database
    #[arg(long)]
    dry_run: bool,

    /// Write a JSON run summary to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    env::load_dotenv();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // LOG_* variables take precedence over the flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("rdw-ingest")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let config = load_config(&cli)?;
    let schema = match &config.source.schema_path {
        Some(path) => TableSchema::load(path)
            .await
            .with_context(|| format!("loading schema {}", path.display()))?,
        None => TableSchema::voertuigen(),
    };

    info!(
        file = %config.source.path.display(),
        table = %schema.table,
        batch_size = config.pipeline.batch_size,
        max_concurrent_batches = config.pipeline.max_concurrent_batches,
        dry_run = cli.dry_run,
        "Starting ingestion"
    );

    let progress = if cli.progress {
        records_spinner("Reading")
    } else {
        ProgressBar::hidden()
    };

    let report = if cli.dry_run {
        pipeline::dry_run(&config, schema, progress).await
    } else {
        pipeline::ingest(&config, schema, progress).await
    };
    report.log();

    if let Some(path) = &cli.report {
        let summary = serde_json::to_vec_pretty(&report.summary())?;
        tokio::fs::write(path, summary)
            .await
            .with_context(|| format!("writing report {}", path.display()))?;
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Environment first, then flags, then validation
fn load_config(cli: &Cli) -> Result<IngestConfig> {
    let mut config = IngestConfig::from_env()?;

    if let Some(file) = &cli.file {
        config.source.path = file.clone();
    }
    if let Some(schema) = &cli.schema {
        config.source.schema_path = Some(schema.clone());
    }
    if cli.no_header_skip {
        config.source.skip_header = false;
    }
    if let Some(batch_size) = cli.batch_size {
        config.pipeline.batch_size = batch_size;
    }
    if let Some(slots) = cli.max_concurrent_batches {
        config.pipeline.max_concurrent_batches = slots;
        if env::var("DATABASE_MAX_CONNECTIONS").is_none() {
            config.database.max_connections = u32::try_from(slots).unwrap_or(u32::MAX);
        }
    }

    config.validate()?;
    Ok(config)
}
