//! Entry points that tie the collaborators together: one collection
//! cycle, one evaluation cycle, an on-demand poll, the retention prune and
//! the registration of the recurring jobs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::DeviceId;
use crate::actors::scheduler::{CHECK_ALERTS, CLEAR_OLD_METRICS, COLLECT_METRICS};
use crate::actors::{AlertEvaluator, MetricsCollector, PollOutcome, SchedulerHandle, Trigger};
use crate::config::{Config, SchedulerConfig};
use crate::device::{DeviceClient, SystemProbe};
use crate::directory::{AlertRuleDirectory, DeviceDirectory, MapSettings, SettingsStore, StaticDirectory};
use crate::notify::Dispatcher;
use crate::security::CredentialVault;
use crate::storage::Storage;

/// Collaborators of a [`Monitor`].
pub struct MonitorParts {
    pub devices: Arc<dyn DeviceDirectory>,
    pub rules: Arc<dyn AlertRuleDirectory>,
    pub settings: Arc<dyn SettingsStore>,
    pub storage: Storage,
    pub probe: Arc<dyn SystemProbe>,
    pub dispatcher: Arc<Dispatcher>,
}

pub struct Monitor {
    devices: Arc<dyn DeviceDirectory>,
    rules: Arc<dyn AlertRuleDirectory>,
    settings: Arc<dyn SettingsStore>,
    storage: Storage,
    collector: MetricsCollector,
    evaluator: AlertEvaluator,
    scheduler_config: SchedulerConfig,
    retention_days: u32,
    cancel: CancellationToken,
}

impl Monitor {
    pub fn new(parts: MonitorParts, scheduler_config: SchedulerConfig, retention_days: u32) -> Self {
        let collector = MetricsCollector::new(
            parts.probe,
            parts.storage.metrics.clone(),
            scheduler_config.max_concurrent_polls,
        );
        let evaluator = AlertEvaluator::new(
            parts.devices.clone(),
            parts.storage.metrics.clone(),
            parts.storage.alerts.clone(),
            parts.dispatcher,
            scheduler_config.stale_after(),
        );

        Self {
            devices: parts.devices,
            rules: parts.rules,
            settings: parts.settings,
            storage: parts.storage,
            collector,
            evaluator,
            scheduler_config,
            retention_days,
            cancel: CancellationToken::new(),
        }
    }

    /// Wire the production collaborators from a configuration file.
    pub fn from_config(config: &Config, storage: Storage, vault: Option<CredentialVault>) -> Self {
        let directory = Arc::new(StaticDirectory::from_config(config));
        let settings: Arc<dyn SettingsStore> =
            Arc::new(MapSettings::new(config.settings.clone()).with_env_overrides());
        let client = DeviceClient::new(&config.connection, vault);
        let dispatcher = Arc::new(Dispatcher::new(settings.clone()));
        let retention_days = config.storage.clone().unwrap_or_default().retention_days();

        Self::new(
            MonitorParts {
                devices: directory.clone(),
                rules: directory,
                settings,
                storage,
                probe: Arc::new(client),
                dispatcher,
            },
            config.scheduler.clone(),
            retention_days,
        )
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Cancelled on shutdown; stops collection from starting new polls.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Poll every device once. Returns the number of devices sampled.
    #[instrument(skip(self))]
    pub async fn run_collection_cycle(&self) -> Result<usize> {
        let devices = self
            .devices
            .list_devices()
            .await
            .context("failed to list devices")?;

        Ok(self.collector.collect_all(devices, &self.cancel).await)
    }

    /// Evaluate all enabled rules once. Returns the number of alerts raised.
    #[instrument(skip(self))]
    pub async fn run_evaluation_cycle(&self) -> Result<usize> {
        let rules = self
            .rules
            .list_rules(true)
            .await
            .context("failed to list alert rules")?;

        Ok(self.evaluator.evaluate_all(&rules).await)
    }

    /// Poll one device right now and store its samples.
    pub async fn poll_device(&self, id: DeviceId) -> Result<PollOutcome> {
        let device = self
            .devices
            .get_device(id)
            .await?
            .with_context(|| format!("device {id} does not exist"))?;

        Ok(self.collector.poll_device(&device).await)
    }

    /// Days of samples to keep: the `metrics_retention_days` setting,
    /// falling back to the storage configuration.
    pub fn retention_days(&self) -> u64 {
        self.settings
            .get_u64("metrics_retention_days", self.retention_days as u64)
    }

    /// Delete samples older than the retention period.
    #[instrument(skip(self))]
    pub async fn prune_old_metrics(&self) -> Result<usize> {
        let days = self.retention_days();
        let cutoff = i64::try_from(days)
            .ok()
            .and_then(TimeDelta::try_days)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .with_context(|| format!("retention of {days} days is out of range"))?;

        let deleted = self
            .storage
            .metrics
            .prune_before(cutoff)
            .await
            .context("failed to prune old metrics")?;

        info!("removed {deleted} samples older than {days} days");
        Ok(deleted)
    }

    /// Register the collection, evaluation and prune jobs.
    pub async fn schedule(self: &Arc<Self>, scheduler: &SchedulerHandle) -> Result<()> {
        let config = &self.scheduler_config;
        config.validate()?;

        let monitor = self.clone();
        scheduler
            .register(
                COLLECT_METRICS,
                Trigger::Every(Duration::from_secs(config.collection_interval)),
                move || {
                    let monitor = monitor.clone();
                    async move { monitor.run_collection_cycle().await.map(|_| ()) }
                },
            )
            .await?;

        let monitor = self.clone();
        scheduler
            .register(
                CHECK_ALERTS,
                Trigger::Every(Duration::from_secs(config.evaluation_interval)),
                move || {
                    let monitor = monitor.clone();
                    async move { monitor.run_evaluation_cycle().await.map(|_| ()) }
                },
            )
            .await?;

        let monitor = self.clone();
        scheduler
            .register(
                CLEAR_OLD_METRICS,
                Trigger::DailyAt {
                    hour: config.prune_hour,
                    minute: config.prune_minute,
                },
                move || {
                    let monitor = monitor.clone();
                    async move { monitor.prune_old_metrics().await.map(|_| ()) }
                },
            )
            .await?;

        debug!("registered monitoring jobs");
        Ok(())
    }
}
