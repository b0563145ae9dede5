pub mod actors;
pub mod config;
pub mod device;
pub mod directory;
pub mod discovery;
pub mod monitor;
pub mod notify;
pub mod routeros;
pub mod security;
pub mod storage;
pub mod util;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a managed device.
pub type DeviceId = i64;

/// Identifier of an alert rule.
pub type RuleId = i64;

/// A credential that never shows up in logs.
///
/// The value may carry the `enc:` tag, in which case it is decrypted by the
/// credential vault right before login.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw stored form, possibly still encrypted.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_encrypted(&self) -> bool {
        self.0.starts_with(security::ENCRYPTED_PREFIX)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// A managed network device.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// Management address (IP or hostname)
    pub address: String,
    pub username: String,
    pub password: Secret,
    #[serde(default = "crate::util::get_default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    pub model: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

fn default_use_tls() -> bool {
    true
}

impl Device {
    /// Name used in logs and notifications.
    pub fn display(&self) -> String {
        format!("{} ({})", self.name, self.address)
    }
}

/// Category a metric sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    Cpu,
    Memory,
    Disk,
    Interface,
    System,
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricCategory::Cpu => "cpu",
            MetricCategory::Memory => "memory",
            MetricCategory::Disk => "disk",
            MetricCategory::Interface => "interface",
            MetricCategory::System => "system",
        };
        f.write_str(s)
    }
}

impl FromStr for MetricCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(MetricCategory::Cpu),
            "memory" => Ok(MetricCategory::Memory),
            "disk" => Ok(MetricCategory::Disk),
            "interface" => Ok(MetricCategory::Interface),
            "system" => Ok(MetricCategory::System),
            other => Err(format!("unknown metric category: {other}")),
        }
    }
}

/// One observation of one metric on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub device_id: DeviceId,
    pub category: MetricCategory,
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(
        device_id: DeviceId,
        category: MetricCategory,
        name: impl Into<String>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            category,
            name: name.into(),
            value,
            timestamp,
        }
    }
}

/// Comparison operator of an alert rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
}

impl Operator {
    /// Compare an observed value against a threshold.
    ///
    /// `Equal` is exact floating point equality.
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::GreaterThan => value > threshold,
            Operator::LessThan => value < threshold,
            Operator::GreaterOrEqual => value >= threshold,
            Operator::LessOrEqual => value <= threshold,
            Operator::Equal => value == threshold,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
            Operator::GreaterOrEqual => ">=",
            Operator::LessOrEqual => "<=",
            Operator::Equal => "==",
        };
        f.write_str(s)
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Operator::GreaterThan),
            "<" => Ok(Operator::LessThan),
            ">=" => Ok(Operator::GreaterOrEqual),
            "<=" => Ok(Operator::LessOrEqual),
            "==" => Ok(Operator::Equal),
            other => Err(format!("unknown operator: {other}")),
        }
    }
}

/// A standing condition evaluated against the latest metrics of one device.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertRule {
    pub id: RuleId,
    pub name: String,
    pub device_id: DeviceId,
    /// `cpu_load`, `memory_usage`, `disk_usage` or `category.name`
    pub metric: String,
    pub operator: Operator,
    pub threshold: f64,
    /// Seconds the condition must hold; 0 means the latest sample decides.
    #[serde(default)]
    pub duration: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub notify_email: bool,
    #[serde(default)]
    pub notify_chat: bool,
    /// Comma separated list of email recipients
    pub email_recipients: Option<String>,
    pub message_template: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// A recorded breach of an alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Assigned by the alert sink
    pub id: Option<i64>,
    pub rule_id: RuleId,
    pub device_id: DeviceId,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub operator: Operator,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

impl AlertEvent {
    pub fn from_breach(rule: &AlertRule, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            rule_id: rule.id,
            device_id: rule.device_id,
            metric: rule.metric.clone(),
            value,
            threshold: rule.threshold,
            operator: rule.operator,
            timestamp,
            acknowledged: false,
        }
    }
}
