use anyhow::{Context, Result};
use azinv::azure::auth::ArmCredentials;
use azinv::azure::client::ArmClient;
use azinv::azure::http::{format_api_error, HttpTemplateFetcher};
use azinv::snapshot::JsonSnapshotStore;
use azinv::{ApiError, CollectionScope, Collector, CollectorConfig, CollectorError};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Incremental Azure inventory collector
#[derive(Parser, Debug)]
#[command(name = "azinv", version, about, long_about = None)]
struct Args {
    /// Azure subscription to collect
    #[arg(short, long)]
    subscription: Option<String>,

    /// Region to collect
    #[arg(short, long)]
    region: Option<String>,

    /// Config file (defaults to <config_dir>/azinv/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Snapshot of the previous run
    #[arg(long, default_value = "snapshot.json")]
    snapshot: PathBuf,

    /// Collect only these deployment ids (repeatable)
    #[arg(long = "target")]
    targets: Vec<String>,

    /// Max parallel API calls per batch (0 = sequential)
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Refetch every deployment, ignoring the snapshot
    #[arg(long)]
    no_deployment_cache: bool,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {log_path:?}"))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("azinv started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("azinv").join("azinv.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".azinv").join("azinv.log");
    }
    PathBuf::from("azinv.log")
}

fn load_config(args: &Args) -> CollectorConfig {
    let mut config = match &args.config {
        Some(path) => CollectorConfig::load_from(path),
        None => CollectorConfig::load(),
    };

    if let Some(sub) = &args.subscription {
        config.subscription_id = Some(sub.clone());
    }
    if let Some(region) = &args.region {
        config.region = Some(region.clone());
    }
    if let Some(threads) = args.threads {
        config.parallel_thread_limit = threads;
    }
    if args.no_deployment_cache {
        config.enabled_deployments_caching = false;
    }

    config
}

/// User-facing message for a failed run
fn describe(err: &CollectorError) -> String {
    let api_err: Option<&ApiError> = match err {
        CollectorError::Api { source, .. } => Some(source),
        CollectorError::Batch(batch) => batch.failures.first().map(|(_, e)| e),
        CollectorError::Snapshot(_) => None,
    };

    match api_err {
        Some(e) => format!("{err}\n{}", format_api_error(e)),
        None => err.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let config = load_config(&args);
    let subscription = config.effective_subscription().context(
        "No Azure subscription configured. Set AZURE_SUBSCRIPTION_ID or use --subscription",
    )?;
    let region = config
        .region
        .clone()
        .context("No region configured. Use --region or set it in the config file")?;

    tracing::info!("Using subscription: {}, region: {}", subscription, region);

    let api = ArmClient::new(&subscription, ArmCredentials::from_env())
        .context("Failed to create Azure client")?;
    let transport = HttpTemplateFetcher::new(config.proxy.as_deref(), config.ssl_verify)
        .context("Failed to create template downloader")?;
    let snapshot = JsonSnapshotStore::load(&args.snapshot)
        .with_context(|| format!("Failed to load snapshot {:?}", args.snapshot))?;

    let scope = if args.targets.is_empty() {
        CollectionScope::Full
    } else {
        CollectionScope::Targeted(args.targets.clone())
    };

    let collector = Collector::new(
        Arc::new(api),
        Arc::new(snapshot),
        Arc::new(transport),
        config,
        &region,
    )
    .with_scope(scope);

    match collector.summary().await {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(err) => {
            tracing::error!("Collection failed: {}", err);
            Err(anyhow::anyhow!(describe(&err)))
        }
    }
}
