//! Sink traits implemented by the storage backends

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use crate::{AlertEvent, DeviceId, MetricCategory, MetricSample};

/// Filter for reading samples back. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct SampleQuery {
    pub device_id: DeviceId,
    pub category: Option<MetricCategory>,
    pub name: Option<String>,

    /// Start of time range (inclusive)
    pub from: Option<DateTime<Utc>>,

    /// End of time range (inclusive)
    pub to: Option<DateTime<Utc>>,

    pub limit: Option<usize>,
}

impl SampleQuery {
    pub fn device(device_id: DeviceId) -> Self {
        Self {
            device_id,
            ..Default::default()
        }
    }

    /// Restrict to one metric series.
    pub fn metric(mut self, category: MetricCategory, name: impl Into<String>) -> Self {
        self.category = Some(category);
        self.name = Some(name.into());
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn until(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, sample: &MetricSample) -> bool {
        sample.device_id == self.device_id
            && self.category.is_none_or(|c| sample.category == c)
            && self.name.as_deref().is_none_or(|n| sample.name == n)
            && self.from.is_none_or(|from| sample.timestamp >= from)
            && self.to.is_none_or(|to| sample.timestamp <= to)
    }
}

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Append-only time series store for device metrics.
///
/// Implementations must be safe for concurrent callers; the collector
/// writes from several polling tasks at once.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Append one poll's samples as a single batch. Returns the number
    /// of samples written.
    async fn append_samples(&self, device_id: DeviceId, samples: Vec<MetricSample>) -> StorageResult<usize>;

    /// Samples matching `query`, newest first.
    async fn query_samples(&self, query: SampleQuery) -> StorageResult<Vec<MetricSample>>;

    /// Delete samples and alert events strictly older than `cutoff`.
    /// Returns the number of samples deleted.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;

    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Human readable summary, e.g. `SQLite: 1200 samples, 0.35 MB on disk`.
    async fn get_stats(&self) -> StorageResult<String>;

    async fn close(&self) -> StorageResult<()>;
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Persist a new alert event and return it with its assigned id.
    async fn record_alert(&self, event: AlertEvent) -> StorageResult<AlertEvent>;

    /// Most recent events first.
    async fn recent_alerts(&self, device_id: Option<DeviceId>, limit: usize) -> StorageResult<Vec<AlertEvent>>;
}

/// A backend that stores both metrics and alert events.
pub trait StorageBackend: MetricsSink + AlertSink {}

impl<T: MetricsSink + AlertSink> StorageBackend for T {}
