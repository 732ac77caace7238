use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metric_store::{
    MetricKind, MetricRecord, MetricService,
    config::{StorageSettings, read_config_file},
    storage::open_repository,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    config: Option<String>,

    /// Database connection string
    #[arg(short)]
    dsn: Option<String>,

    /// Snapshot file
    #[arg(short)]
    file: Option<PathBuf>,

    /// Restore the snapshot file on start
    #[arg(short)]
    restore: Option<bool>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Set a gauge
    Gauge {
        name: String,
        #[arg(allow_hyphen_values = true)]
        value: f64,
    },

    /// Add to a counter
    Counter {
        name: String,
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },

    /// Print a single metric
    Get { kind: String, name: String },

    /// Apply a JSON array of metrics as one batch
    Batch { file: PathBuf },

    /// Print all metrics
    List,

    /// Check the backend
    Ping,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("metric_store", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn settings(args: &Args) -> anyhow::Result<StorageSettings> {
    let mut settings = match &args.config {
        Some(path) => read_config_file(path)?,
        None => StorageSettings::default(),
    };
    settings.apply_env()?;

    if let Some(dsn) = &args.dsn {
        settings.database_dsn = Some(dsn.clone());
    }
    if let Some(file) = &args.file {
        settings.file_storage_path = Some(file.clone());
    }
    if let Some(restore) = args.restore {
        settings.restore = restore;
    }

    // A one-shot process never sees a periodic tick.
    settings.store_interval = 0;
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let settings = settings(&args)?;
    debug!("selected backend: {:?}", settings.backend());

    let shutdown = CancellationToken::new();
    let repository = open_repository(&settings, shutdown.clone()).await?;
    let service = MetricService::new(repository);

    match args.command {
        Command::Gauge { name, value } => {
            let mut metric = MetricRecord::gauge(name, value);
            service.update_metric(&mut metric).await?;
            println!("{} = {}", metric.id, metric.display_value());
        }
        Command::Counter { name, delta } => {
            let mut metric = MetricRecord::counter(name, delta);
            service.update_metric(&mut metric).await?;
            println!("{} = {}", metric.id, metric.display_value());
        }
        Command::Get { kind, name } => {
            let mut metric = MetricRecord {
                id: name,
                kind: kind.parse::<MetricKind>()?,
                delta: None,
                value: None,
            };
            service.get_metric(&mut metric).await?;
            println!("{} = {}", metric.id, metric.display_value());
        }
        Command::Batch { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let metrics: Vec<MetricRecord> =
                serde_json::from_str(&content).context("invalid batch file")?;
            service.batch_update(&metrics).await?;
            println!("applied {} metrics", metrics.len());
        }
        Command::List => {
            for (name, value) in service.listing().await? {
                println!("{name}\t{value}");
            }
        }
        Command::Ping => {
            service.ping().await?;
            println!("ok");
        }
    }

    shutdown.cancel();
    Ok(())
}
