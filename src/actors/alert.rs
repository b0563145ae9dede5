//! Alert rule evaluation
//!
//! Rules are checked one after another against the newest stored sample of
//! their metric. A breach is recorded first and only then handed to the
//! dispatcher, so a failing notification never loses the event.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::directory::DeviceDirectory;
use crate::notify::{Channels, DispatchReport, Dispatcher};
use crate::storage::{AlertSink, MetricsSink, SampleQuery};
use crate::{AlertEvent, AlertRule, MetricCategory};

/// What happened to one rule during an evaluation run.
#[derive(Debug)]
pub enum RuleOutcome {
    Disabled,
    DeviceMissing,
    UnknownMetric,
    /// The rule cannot be evaluated as written
    InvalidRule(String),
    /// No sample inside the staleness window
    DeviceOffline,
    NotBreached { value: f64 },
    Breached {
        event: AlertEvent,
        /// `None` when no channel was enabled
        report: Option<DispatchReport>,
    },
    Failed(String),
}

impl RuleOutcome {
    pub fn is_breached(&self) -> bool {
        matches!(self, RuleOutcome::Breached { .. })
    }
}

/// Map a rule's metric identifier onto a stored series.
///
/// `cpu_load`, `memory_usage` and `disk_usage` are shorthands; anything
/// else must be written as `category.name`.
pub fn metric_series(metric: &str) -> Option<(MetricCategory, String)> {
    match metric {
        "cpu_load" => Some((MetricCategory::Cpu, "load".to_string())),
        "memory_usage" => Some((MetricCategory::Memory, "usage".to_string())),
        "disk_usage" => Some((MetricCategory::Disk, "usage".to_string())),
        other => {
            let (category, name) = other.split_once('.')?;
            if name.is_empty() {
                return None;
            }
            Some((category.parse().ok()?, name.to_string()))
        }
    }
}

pub struct AlertEvaluator {
    devices: Arc<dyn DeviceDirectory>,
    metrics: Arc<dyn MetricsSink>,
    alerts: Arc<dyn AlertSink>,
    dispatcher: Arc<Dispatcher>,
    stale_after: Duration,
}

impl AlertEvaluator {
    pub fn new(
        devices: Arc<dyn DeviceDirectory>,
        metrics: Arc<dyn MetricsSink>,
        alerts: Arc<dyn AlertSink>,
        dispatcher: Arc<Dispatcher>,
        stale_after: Duration,
    ) -> Self {
        Self {
            devices,
            metrics,
            alerts,
            dispatcher,
            stale_after,
        }
    }

    /// Evaluate every rule and return the number of alerts raised.
    #[instrument(skip_all, fields(rules = rules.len()))]
    pub async fn evaluate_all(&self, rules: &[AlertRule]) -> usize {
        let now = Utc::now();
        let mut raised = 0;

        for rule in rules {
            match self.evaluate_rule(rule, now).await {
                RuleOutcome::Breached { .. } => raised += 1,
                RuleOutcome::Failed(message) => error!("rule {} ({}) failed: {message}", rule.id, rule.name),
                RuleOutcome::InvalidRule(message) => {
                    warn!("rule {} ({}) is invalid: {message}", rule.id, rule.name)
                }
                outcome => debug!("rule {} ({}): {outcome:?}", rule.id, rule.name),
            }
        }

        debug!("{raised} alerts raised");
        raised
    }

    #[instrument(skip(self, rule), fields(rule_id = rule.id, device_id = rule.device_id))]
    pub async fn evaluate_rule(&self, rule: &AlertRule, now: DateTime<Utc>) -> RuleOutcome {
        if !rule.enabled {
            return RuleOutcome::Disabled;
        }

        let device = match self.devices.get_device(rule.device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                warn!("alert rule {} references non-existent device {}", rule.id, rule.device_id);
                return RuleOutcome::DeviceMissing;
            }
            Err(e) => return RuleOutcome::Failed(format!("device lookup failed: {e:#}")),
        };

        let Some((category, name)) = metric_series(&rule.metric) else {
            warn!("metric {} of rule {} is not known", rule.metric, rule.id);
            return RuleOutcome::UnknownMetric;
        };

        let series = SampleQuery::device(device.id).metric(category, name);

        let latest = match self.metrics.query_samples(series.clone().limit(1)).await {
            Ok(samples) => samples.into_iter().next(),
            Err(e) => return RuleOutcome::Failed(format!("reading samples failed: {e}")),
        };

        let Some(latest) = latest.filter(|s| !is_stale(s.timestamp, now, self.stale_after)) else {
            debug!("{} has no recent samples, treating it as offline", device.name);
            return RuleOutcome::DeviceOffline;
        };

        let breached = if rule.duration == 0 {
            rule.operator.check(latest.value, rule.threshold)
        } else {
            let Some(window_start) = window_start(now, rule.duration) else {
                return RuleOutcome::InvalidRule(format!("duration of {}s is out of range", rule.duration));
            };
            let window = match self.metrics.query_samples(series.since(window_start)).await {
                Ok(samples) if samples.is_empty() => vec![latest.clone()],
                Ok(samples) => samples,
                Err(e) => return RuleOutcome::Failed(format!("reading samples failed: {e}")),
            };
            window.iter().all(|s| rule.operator.check(s.value, rule.threshold))
        };

        if !breached {
            return RuleOutcome::NotBreached { value: latest.value };
        }

        let event = match self
            .alerts
            .record_alert(AlertEvent::from_breach(rule, latest.value, now))
            .await
        {
            Ok(event) => event,
            Err(e) => return RuleOutcome::Failed(format!("recording alert failed: {e}")),
        };

        info!(
            "alert triggered: {} for device {} ({} {} {}, value {})",
            rule.name, device.name, rule.metric, rule.operator, rule.threshold, latest.value
        );

        let channels = Channels::for_rule(rule, self.dispatcher.settings());
        let report = if channels.any() {
            Some(self.dispatcher.send(&event, rule, &device, channels).await)
        } else {
            None
        };

        RuleOutcome::Breached { event, report }
    }
}

/// Start of a sustained-breach window of `seconds` ending at `now`.
fn window_start(now: DateTime<Utc>, seconds: u64) -> Option<DateTime<Utc>> {
    let seconds = i64::try_from(seconds).ok()?;
    now.checked_sub_signed(TimeDelta::try_seconds(seconds)?)
}

fn is_stale(timestamp: DateTime<Utc>, now: DateTime<Utc>, stale_after: Duration) -> bool {
    match (now - timestamp).to_std() {
        Ok(age) => age > stale_after,
        // Sample from the future
        Err(_) => false,
    }
}
