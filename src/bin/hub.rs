use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tikmon::{
    actors::SchedulerHandle,
    config::read_config_file,
    monitor::Monitor,
    security::CredentialVault,
    storage,
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "tikmon-hub")]
#[command(about = "Polls RouterOS devices, stores their metrics and raises alerts", long_about = None)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Log everything down to trace level
    #[arg(short, long)]
    verbose: bool,
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new()
        .with_targets(vec![("tikmon", level), ("tikmon_hub", level)]);
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let vault = match CredentialVault::from_env() {
        Ok(vault) => Some(vault),
        Err(e) => {
            warn!("{e}, encrypted device passwords cannot be used");
            None
        }
    };

    let storage = storage::open(&config.storage.clone().unwrap_or_default())
        .await
        .context("failed to open storage")?;

    storage.ensure_healthy().await?;
    debug!("storage ready: {}", storage.metrics.get_stats().await?);

    let monitor = Arc::new(Monitor::from_config(&config, storage, vault));
    let scheduler = SchedulerHandle::spawn(Duration::from_secs(config.scheduler.shutdown_timeout));

    monitor.schedule(&scheduler).await?;
    info!(
        "monitoring {} devices with {} alert rules",
        config.devices.len(),
        config.alert_rules.len()
    );

    for job in scheduler.jobs().await? {
        debug!("job {} runs {}", job.id, job.trigger);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    monitor.cancellation_token().cancel();
    let report = scheduler.shutdown().await?;
    if !report.aborted.is_empty() {
        warn!("jobs aborted at shutdown: {}", report.aborted.join(", "));
    }

    if let Err(e) = monitor.storage().metrics.close().await {
        error!("failed to close storage: {e}");
    }

    Ok(())
}
