use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use candle_indicators::config::{self, AppConfig};
use candle_indicators::engine::IndicatorEngine;
use candle_indicators::model::Candle;
use candle_indicators::runner::{IndicatorRunner, RunMode};
use candle_indicators::storage::Storage;
use candle_indicators::storage::sqlite::SqliteStorage;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("indicator run failed")]
    Compute,
    #[display("input/output error")]
    Io,
}

#[derive(Parser)]
#[command(name = "candle-indicators", about = "Technical indicators over stored OHLCV candles")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute indicators for the configured series
    Compute {
        /// Only this symbol
        #[arg(long)]
        symbol: Option<String>,
        /// Override the configured run mode
        #[arg(long, value_enum)]
        mode: Option<RunMode>,
    },
    /// Load candles from a JSON array of klines
    Import {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Print stored indicator values as JSON lines
    Export {
        #[arg(long)]
        symbol: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    let db_path = config.database_path();
    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::open(Path::new(&db_path))
            .await
            .change_context(AppError::Storage)?,
    );

    match cli.command {
        Command::Compute { symbol, mode } => compute(&config, storage, symbol, mode).await,
        Command::Import { symbol, file } => import(storage.as_ref(), &symbol, &file).await,
        Command::Export { symbol } => export(storage.as_ref(), &symbol).await,
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }
}

async fn compute(
    config: &AppConfig,
    storage: Arc<dyn Storage>,
    symbol: Option<String>,
    mode: Option<RunMode>,
) -> Result<(), Report<AppError>> {
    let engine = IndicatorEngine::new(config.indicators).change_context(AppError::Config)?;
    let kinds: Vec<String> = engine.kinds().iter().map(ToString::to_string).collect();
    info!(
        indicators = ?kinds,
        min_history = engine.min_history(),
        "indicator engine ready"
    );
    let runner = IndicatorRunner::new(engine, storage);

    let jobs: Vec<(String, RunMode)> = match symbol {
        Some(symbol) => {
            let configured = config
                .series
                .iter()
                .find(|s| s.symbol == symbol)
                .map(|s| s.mode)
                .unwrap_or_default();
            vec![(symbol, mode.unwrap_or(configured))]
        }
        None => config
            .series
            .iter()
            .map(|s| (s.symbol.clone(), mode.unwrap_or(s.mode)))
            .collect(),
    };

    if jobs.is_empty() {
        tracing::warn!("no series configured; nothing to do");
        return Ok(());
    }

    let mut failed = Vec::new();
    for (symbol, mode) in &jobs {
        if let Err(e) = runner.run(symbol, *mode).await {
            tracing::error!(error = ?e, symbol, "indicator run failed");
            failed.push(symbol.clone());
        }
    }

    if !failed.is_empty() {
        return Err(Report::new(AppError::Compute).attach(format!("failed series: {failed:?}")));
    }
    Ok(())
}

async fn import(storage: &dyn Storage, symbol: &str, file: &Path) -> Result<(), Report<AppError>> {
    let content = std::fs::read_to_string(file)
        .change_context(AppError::Io)
        .attach_with(|| format!("path: {}", file.display()))?;
    let candles: Vec<Candle> = serde_json::from_str(&content)
        .change_context(AppError::Io)
        .attach_with(|| format!("expected a JSON array of candles in {}", file.display()))?;

    let written = storage
        .upsert_candles(symbol, &candles)
        .await
        .change_context(AppError::Storage)?;

    info!(symbol, written, "candles imported");
    Ok(())
}

async fn export(storage: &dyn Storage, symbol: &str) -> Result<(), Report<AppError>> {
    let snapshots = storage
        .load_snapshots(symbol)
        .await
        .change_context(AppError::Storage)?;

    let mut out = std::io::stdout().lock();
    for snapshot in &snapshots {
        let line = serde_json::to_string(snapshot).change_context(AppError::Io)?;
        writeln!(out, "{line}").change_context(AppError::Io)?;
    }
    Ok(())
}
