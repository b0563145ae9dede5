//! Operator command line
//!
//! One-off operations against managed devices and the metric store. Every
//! command prints its result as JSON on stdout.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tikmon::{
    Device, DeviceId, MetricCategory,
    config::{Config, read_config_file},
    device::DeviceClient,
    discovery::{self, ScanOptions},
    security::CredentialVault,
    storage::{
        self, SampleQuery,
        series::{self, SeriesOptions},
    },
};
use tracing::{level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "tikmon-ctl")]
#[command(about = "Run one-off operations against RouterOS devices", long_about = None)]
struct Cli {
    /// Config file
    #[arg(short, global = true)]
    file: Option<String>,

    /// Log to stderr down to debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan an IPv4 network for devices exposing management ports
    Scan {
        /// Network in CIDR notation, e.g. 192.168.88.0/24
        cidr: String,

        /// Ports to probe (defaults to the configured list)
        #[arg(short, long, value_delimiter = ',')]
        ports: Vec<u16>,
    },

    /// Infer links between all configured devices
    Topology,

    /// Stored samples of one device, newest first
    Metrics {
        device: DeviceId,

        #[arg(short, long)]
        category: Option<MetricCategory>,

        #[arg(short, long, requires = "category")]
        name: Option<String>,

        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Statistics, resampled buckets, anomalies and a forecast of one
    /// stored series
    Series {
        device: DeviceId,

        category: MetricCategory,

        name: String,

        /// Only samples from the last N hours
        #[arg(long, default_value_t = 24)]
        hours: i64,

        /// Resample bucket width in minutes
        #[arg(short, long, default_value_t = 5)]
        interval: u64,

        /// Z-score above which a sample is an anomaly
        #[arg(short, long, default_value_t = series::DEFAULT_ZSCORE_THRESHOLD)]
        zscore: f64,

        /// Forecast steps
        #[arg(short, long, default_value_t = series::DEFAULT_FORECAST_PERIODS)]
        periods: usize,
    },

    /// Wireless clients, DHCP leases and CAPsMAN registrations
    Clients { device: DeviceId },

    /// Interface counters
    Interfaces {
        device: DeviceId,

        /// Only this interface
        #[arg(short, long)]
        name: Option<String>,

        /// Interface types to include, empty for all
        #[arg(short, long, value_delimiter = ',')]
        types: Option<Vec<String>>,
    },

    /// VPN tunnels and server settings
    Vpn { device: DeviceId },

    /// PPP accounts and OpenVPN certificate users
    VpnUsers { device: DeviceId },

    /// Run a raw command, e.g. "/ip/address/print"
    Command { device: DeviceId, command: String },

    /// Save a configuration backup on the device
    Backup { device: DeviceId },

    /// Load a backup file that exists on the device
    Restore { device: DeviceId, filename: String },

    /// Encrypt a password for the config file
    EncryptPassword { password: String },
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let filter = filter::Targets::new()
        .with_targets(vec![("tikmon", level), ("tikmon_ctl", level)]);
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

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn find_device(config: &Config, id: DeviceId) -> Result<&Device> {
    config
        .devices
        .iter()
        .find(|d| d.id == id)
        .with_context(|| format!("device {id} is not configured"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init(cli.verbose);
    trace!("started with args: {cli:?}");

    let config = match &cli.file {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };
    let client = DeviceClient::new(&config.connection, CredentialVault::from_env().ok());

    match cli.command {
        Commands::Scan { cidr, ports } => {
            let mut options = ScanOptions::from(&config.discovery);
            if !ports.is_empty() {
                options.ports = ports;
            }
            print_json(&discovery::scan(&cidr, &options).await?)
        }
        Commands::Topology => {
            if config.devices.is_empty() {
                bail!("no devices configured");
            }
            print_json(&discovery::discover_topology(&client, &config.devices).await)
        }
        Commands::Metrics {
            device,
            category,
            name,
            limit,
        } => {
            let storage = storage::open(&config.storage.clone().unwrap_or_default()).await?;
            let mut query = SampleQuery::device(device).limit(limit);
            query.category = category;
            query.name = name;
            let samples = storage.metrics.query_samples(query).await?;
            storage.metrics.close().await?;
            print_json(&samples)
        }
        Commands::Series {
            device,
            category,
            name,
            hours,
            interval,
            zscore,
            periods,
        } => {
            let since = chrono::TimeDelta::try_hours(hours)
                .and_then(|window| chrono::Utc::now().checked_sub_signed(window))
                .with_context(|| format!("{hours} hours is out of range"))?;
            let options = SeriesOptions {
                interval: std::time::Duration::from_secs(interval.saturating_mul(60)),
                zscore_threshold: zscore,
                forecast_periods: periods,
            };

            let storage = storage::open(&config.storage.clone().unwrap_or_default()).await?;
            let query = SampleQuery::device(device).metric(category, name).since(since);
            let report = series::analyze(storage.metrics.as_ref(), query, &options).await?;
            storage.metrics.close().await?;
            print_json(&report)
        }
        Commands::Clients { device } => {
            let device = find_device(&config, device)?;
            print_json(&client.get_connected_clients(device).await?)
        }
        Commands::Interfaces {
            device,
            name,
            types,
        } => {
            let device = find_device(&config, device)?;
            let traffic = client
                .get_interface_traffic(device, name.as_deref(), types.as_deref())
                .await?;
            print_json(&traffic)
        }
        Commands::Vpn { device } => {
            let device = find_device(&config, device)?;
            print_json(&client.get_vpn_status(device).await?)
        }
        Commands::VpnUsers { device } => {
            let device = find_device(&config, device)?;
            print_json(&client.get_vpn_users(device).await?)
        }
        Commands::Command { device, command } => {
            let device = find_device(&config, device)?;
            print_json(&client.send_raw_command(device, &command).await?)
        }
        Commands::Backup { device } => {
            let device = find_device(&config, device)?;
            print_json(&client.backup_configuration(device).await?)
        }
        Commands::Restore { device, filename } => {
            let device = find_device(&config, device)?;
            print_json(&client.restore_configuration(device, &filename).await?)
        }
        Commands::EncryptPassword { password } => {
            let vault = CredentialVault::from_env()
                .context("set TIKMON_ENCRYPTION_KEY to encrypt passwords")?;
            println!("{}", vault.encrypt(&password)?);
            Ok(())
        }
    }
}
