use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::{AlertRule, Device};

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None {
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },

    /// SQLite database
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Samples older than this are pruned by the daily job
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl StorageConfig {
    pub fn retention_days(&self) -> u32 {
        match self {
            StorageConfig::None { retention_days } => *retention_days,
            StorageConfig::Sqlite { retention_days, .. } => *retention_days,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./tikmon.db")
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<Device>,

    #[serde(default)]
    pub alert_rules: Vec<AlertRule>,

    /// Defaults to SQLite when omitted
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Operator settings (mail server, chat tokens, channel switches, ...)
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between metric collection runs
    #[serde(default = "crate::util::get_monitoring_interval")]
    pub collection_interval: u64,

    /// Seconds between alert evaluation runs
    #[serde(default = "crate::util::get_alert_check_interval")]
    pub evaluation_interval: u64,

    /// UTC hour of the daily retention prune
    #[serde(default = "default_prune_hour")]
    pub prune_hour: u32,

    #[serde(default)]
    pub prune_minute: u32,

    /// Devices polled at the same time during one collection run
    #[serde(default = "default_max_concurrent_polls")]
    pub max_concurrent_polls: usize,

    /// Seconds to wait for in-flight jobs on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// A device whose latest sample is older than this many collection
    /// intervals is considered offline by the evaluator
    #[serde(default = "default_stale_factor")]
    pub stale_factor: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            collection_interval: crate::util::get_monitoring_interval(),
            evaluation_interval: crate::util::get_alert_check_interval(),
            prune_hour: default_prune_hour(),
            prune_minute: 0,
            max_concurrent_polls: default_max_concurrent_polls(),
            shutdown_timeout: default_shutdown_timeout(),
            stale_factor: default_stale_factor(),
        }
    }
}

impl SchedulerConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.collection_interval.saturating_mul(self.stale_factor as u64))
    }

    /// Reject intervals the scheduler cannot run.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.collection_interval == 0 {
            anyhow::bail!("scheduler.collection_interval must be greater than zero");
        }
        if self.evaluation_interval == 0 {
            anyhow::bail!("scheduler.evaluation_interval must be greater than zero");
        }
        if self.prune_hour > 23 || self.prune_minute > 59 {
            anyhow::bail!(
                "scheduler prune time {:02}:{:02} is not a valid time of day",
                self.prune_hour,
                self.prune_minute
            );
        }
        if self.max_concurrent_polls == 0 {
            anyhow::bail!("scheduler.max_concurrent_polls must be greater than zero");
        }
        Ok(())
    }
}

fn default_prune_hour() -> u32 {
    1
}

fn default_max_concurrent_polls() -> usize {
    8
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_stale_factor() -> u32 {
    3
}

/// Device session settings
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ConnectionConfig {
    /// Seconds allowed for connecting and logging in
    #[serde(default = "crate::util::get_connection_timeout")]
    pub timeout: u64,

    /// Seconds allowed for a single command round trip
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,

    /// Extra connection attempts for backup and restore
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Seconds between connection attempts
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    /// Seconds to let the device write a backup file
    #[serde(default = "default_backup_wait")]
    pub backup_wait: u64,

    /// Seconds to let the device pick up a restore
    #[serde(default = "default_restore_wait")]
    pub restore_wait: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: crate::util::get_connection_timeout(),
            command_timeout: default_command_timeout(),
            retries: default_retries(),
            retry_delay: default_retry_delay(),
            backup_wait: default_backup_wait(),
            restore_wait: default_restore_wait(),
        }
    }
}

fn default_command_timeout() -> u64 {
    15
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    2
}

fn default_backup_wait() -> u64 {
    2
}

fn default_restore_wait() -> u64 {
    3
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_ports")]
    pub ports: Vec<u16>,

    #[serde(default = "default_discovery_concurrency")]
    pub concurrency: usize,

    /// Milliseconds per TCP probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ports: default_discovery_ports(),
            concurrency: default_discovery_concurrency(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

fn default_discovery_ports() -> Vec<u16> {
    vec![8728, 8729, 8291, 80]
}

fn default_discovery_concurrency() -> usize {
    10
}

fn default_probe_timeout() -> u64 {
    1000
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
        .inspect(|config| trace!("loaded config with {} devices", config.devices.len()))
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    let config: Config = serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.scheduler.validate()?;
    Ok(config)
}
