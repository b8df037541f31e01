//! Feedload - chunked product feed loader

use anyhow::Result;
use clap::Parser;
use feedload_common::logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput};
use feedload_etl::config::{
    parse_delimiter, DEFAULT_BATCH_SIZE, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_INSERT_BATCH_ROWS,
};
use feedload_etl::{EtlConfig, Pipeline};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "feedload")]
#[command(author, version, about = "Load a delimited product feed into a relational table")]
struct Cli {
    /// Source file (CSV, optionally gzip-compressed)
    #[arg(short, long, env = "FEEDLOAD_SOURCE")]
    source: PathBuf,

    /// Sink database URL (postgres://... or sqlite://...)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    /// Rows per chunk
    #[arg(short, long, env = "FEEDLOAD_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Rows per INSERT statement within a chunk
    #[arg(long, env = "FEEDLOAD_INSERT_BATCH_ROWS", default_value_t = DEFAULT_INSERT_BATCH_ROWS)]
    insert_batch_rows: usize,

    /// Field delimiter; `\t` or `tab` for tabs
    #[arg(long, env = "FEEDLOAD_DELIMITER", default_value = ",", value_parser = parse_delimiter)]
    delimiter: char,

    /// Cell value read as null (repeatable, replaces the defaults)
    #[arg(long = "null-marker", env = "FEEDLOAD_NULL_MARKERS", value_delimiter = ',')]
    null_markers: Vec<String>,

    /// Seconds to wait for the database connection
    #[arg(long, env = "DATABASE_CONNECT_TIMEOUT", default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout_secs: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Log output target (console, file, both)
    #[arg(long)]
    log_output: Option<LogOutput>,

    /// Log format (text, json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Directory for log files
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn log_config(&self) -> Result<LogConfig> {
        let mut config = LogConfig::from_env()?;

        if self.verbose {
            config.level = LogLevel::Debug;
        }
        if let Some(output) = self.log_output {
            config.output = output;
        }
        if let Some(format) = self.log_format {
            config.format = format;
        }
        if let Some(ref dir) = self.log_dir {
            config.log_dir = dir.clone();
        }

        Ok(config)
    }

    fn etl_config(&self) -> EtlConfig {
        let config = EtlConfig::new(&self.source, &self.database_url)
            .with_batch_size(self.batch_size)
            .with_insert_batch_rows(self.insert_batch_rows)
            .with_delimiter(self.delimiter)
            .with_connect_timeout_secs(self.connect_timeout_secs);

        if self.null_markers.is_empty() {
            config
        } else {
            config.with_null_markers(self.null_markers.iter().map(|m| m.trim().to_string()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli.log_config()?)?;

    let config = cli.etl_config();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    match Pipeline::new(config).run().await {
        Ok(summary) => {
            info!(
                rows_loaded = summary.rows_loaded,
                rows_dropped = summary.rows_dropped,
                rows_skipped = summary.rows_skipped,
                "Feed loaded"
            );
            Ok(())
        },
        Err(aborted) => Err(aborted.into()),
    }
}
