//! Read-only views of the managed fleet, the alert rules and the operator
//! settings.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::trace;

use crate::config::Config;
use crate::{AlertRule, Device, DeviceId};

#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn list_devices(&self) -> anyhow::Result<Vec<Device>>;

    async fn get_device(&self, id: DeviceId) -> anyhow::Result<Option<Device>>;
}

#[async_trait]
pub trait AlertRuleDirectory: Send + Sync {
    async fn list_rules(&self, enabled_only: bool) -> anyhow::Result<Vec<AlertRule>>;
}

/// String key/value settings with typed accessors.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// `true`, `1`, `yes` and `on` (any case) are true, everything else false.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(value) => matches!(
                value.trim().to_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            ),
            None => default,
        }
    }

    /// Falls back to `default` when the value is missing or not a number.
    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

/// Devices and rules taken from the configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    devices: Vec<Device>,
    rules: Vec<AlertRule>,
}

impl StaticDirectory {
    pub fn new(devices: Vec<Device>, rules: Vec<AlertRule>) -> Self {
        Self { devices, rules }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.devices.clone(), config.alert_rules.clone())
    }
}

#[async_trait]
impl DeviceDirectory for StaticDirectory {
    async fn list_devices(&self) -> anyhow::Result<Vec<Device>> {
        Ok(self.devices.clone())
    }

    async fn get_device(&self, id: DeviceId) -> anyhow::Result<Option<Device>> {
        Ok(self.devices.iter().find(|d| d.id == id).cloned())
    }
}

#[async_trait]
impl AlertRuleDirectory for StaticDirectory {
    async fn list_rules(&self, enabled_only: bool) -> anyhow::Result<Vec<AlertRule>> {
        Ok(self
            .rules
            .iter()
            .filter(|r| !enabled_only || r.enabled)
            .cloned()
            .collect())
    }
}

/// Settings from a map. Environment variables named `TIKMON_<KEY>` (key in
/// upper case) override entries when loaded through [`MapSettings::with_env_overrides`].
#[derive(Debug, Clone, Default)]
pub struct MapSettings {
    values: HashMap<String, String>,
}

impl MapSettings {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn with_env_overrides(mut self) -> Self {
        for (key, value) in std::env::vars() {
            if let Some(name) = key.strip_prefix("TIKMON_") {
                trace!("setting {} overridden from environment", name.to_lowercase());
                self.values.insert(name.to_lowercase(), value);
            }
        }
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSettings {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl SettingsStore for MapSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
