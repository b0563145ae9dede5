//! In-memory storage backend (no persistence)
//!
//! Useful for tests and for running without a database file. All data is
//! lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{AlertSink, HealthStatus, MetricsSink, SampleQuery};
use super::error::StorageResult;
use crate::{AlertEvent, DeviceId, MetricSample};

#[derive(Default)]
struct Inner {
    /// Samples in insertion order
    samples: Vec<MetricSample>,
    alerts: Vec<AlertEvent>,
    next_alert_id: i64,
}

#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sample_count(&self) -> usize {
        self.inner.read().await.samples.len()
    }
}

#[async_trait]
impl MetricsSink for MemoryBackend {
    async fn append_samples(&self, device_id: DeviceId, samples: Vec<MetricSample>) -> StorageResult<usize> {
        let count = samples.len();
        let mut inner = self.inner.write().await;
        inner
            .samples
            .extend(samples.into_iter().map(|s| MetricSample { device_id, ..s }));

        debug!("stored {count} samples for device {device_id} in memory");
        Ok(count)
    }

    async fn query_samples(&self, query: SampleQuery) -> StorageResult<Vec<MetricSample>> {
        let inner = self.inner.read().await;

        let mut matching: Vec<MetricSample> = inner
            .samples
            .iter()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();

        // Stable sort keeps later inserts after earlier ones with the same
        // timestamp, reversing makes them come first.
        matching.sort_by_key(|s| s.timestamp);
        matching.reverse();
        matching.truncate(query.limit.unwrap_or(usize::MAX));

        Ok(matching)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.samples.len();
        inner.samples.retain(|s| s.timestamp >= cutoff);
        let deleted = before - inner.samples.len();

        let alerts_before = inner.alerts.len();
        inner.alerts.retain(|a| a.timestamp >= cutoff);
        let alerts_deleted = alerts_before - inner.alerts.len();

        debug!("pruned {deleted} samples and {alerts_deleted} alerts older than {cutoff}");
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let inner = self.inner.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_samples".to_string(), inner.samples.len().to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let inner = self.inner.read().await;
        Ok(format!(
            "In-Memory: {} samples, {} alerts",
            inner.samples.len(),
            inner.alerts.len()
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}

#[async_trait]
impl AlertSink for MemoryBackend {
    async fn record_alert(&self, mut event: AlertEvent) -> StorageResult<AlertEvent> {
        let mut inner = self.inner.write().await;
        inner.next_alert_id += 1;
        event.id = Some(inner.next_alert_id);
        inner.alerts.push(event.clone());
        Ok(event)
    }

    async fn recent_alerts(&self, device_id: Option<DeviceId>, limit: usize) -> StorageResult<Vec<AlertEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .alerts
            .iter()
            .rev()
            .filter(|a| device_id.is_none_or(|id| a.device_id == id))
            .take(limit)
            .cloned()
            .collect())
    }
}
