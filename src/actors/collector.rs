//! Metrics collection across the fleet
//!
//! Every device is polled in its own task, with at most
//! `max_concurrent` polls in flight. A device that is offline or answers
//! garbage is logged and skipped; it never holds up the others.
//!
//! ```text
//! devices → [semaphore] → poll (SystemProbe) → samples → MetricsSink
//!                ↑                 ↑
//!                └─── cancellation: no new polls start, running polls stop
//! ```
//!
//! Poll tasks live in a `JoinSet`, so dropping a collection run (the
//! scheduler aborting its job) aborts every poll it started.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::device::{SystemProbe, SystemStatus};
use crate::storage::MetricsSink;
use crate::{Device, DeviceId};

/// Result of polling one device.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Samples were written to the sink
    Stored { device_id: DeviceId, samples: usize },
    Offline { device_id: DeviceId, reason: String },
    /// The device answered but the poll was unusable
    Failed { device_id: DeviceId, message: String },
    /// The poll succeeded but the sink refused the batch
    StoreFailed { device_id: DeviceId, message: String },
    /// The run was cancelled while this device was being polled
    Cancelled { device_id: DeviceId },
}

impl PollOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, PollOutcome::Stored { .. })
    }
}

#[derive(Clone)]
pub struct MetricsCollector {
    probe: Arc<dyn SystemProbe>,
    sink: Arc<dyn MetricsSink>,
    max_concurrent: usize,
}

impl MetricsCollector {
    pub fn new(probe: Arc<dyn SystemProbe>, sink: Arc<dyn MetricsSink>, max_concurrent: usize) -> Self {
        Self {
            probe,
            sink,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Poll one device and store its samples under a single timestamp.
    #[instrument(skip_all, fields(device = %device.name))]
    pub async fn poll_device(&self, device: &Device) -> PollOutcome {
        poll_device(self.probe.as_ref(), self.sink.as_ref(), device).await
    }

    /// Poll every device and return how many were sampled successfully.
    ///
    /// Once `cancel` fires no further polls start and running polls are
    /// stopped before they store anything. Devices that never started and
    /// those still in flight are logged.
    #[instrument(skip_all, fields(devices = devices.len()))]
    pub async fn collect_all(&self, devices: Vec<Device>, cancel: &CancellationToken) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut polls = JoinSet::new();
        let mut not_started = Vec::new();

        for device in devices {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                not_started.push(device.display());
                continue;
            };

            let probe = self.probe.clone();
            let sink = self.sink.clone();
            let cancel = cancel.clone();
            polls.spawn(async move {
                let _permit = permit;
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => PollOutcome::Cancelled { device_id: device.id },
                    outcome = poll_device(probe.as_ref(), sink.as_ref(), &device) => outcome,
                };
                (device.display(), outcome)
            });
        }

        let mut stored = 0;
        let mut interrupted = Vec::new();
        while let Some(joined) = polls.join_next().await {
            match joined {
                Ok((_, outcome)) if outcome.is_stored() => stored += 1,
                Ok((device, PollOutcome::Cancelled { .. })) => interrupted.push(device),
                Ok(_) => {}
                Err(e) => error!("poll task failed: {e}"),
            }
        }

        if !interrupted.is_empty() {
            interrupted.sort();
            warn!(
                "collection cancelled, {} devices were still being polled: {}",
                interrupted.len(),
                interrupted.join(", ")
            );
        }
        if !not_started.is_empty() {
            warn!(
                "collection cancelled, {} devices not polled: {}",
                not_started.len(),
                not_started.join(", ")
            );
        }

        info!("collected metrics from {stored} devices");
        stored
    }
}

async fn poll_device(probe: &dyn SystemProbe, sink: &dyn MetricsSink, device: &Device) -> PollOutcome {
    let device_id = device.id;

    match probe.system_metrics(device).await {
        SystemStatus::Online(metrics) => {
            let samples = metrics.samples(device_id, Utc::now());
            match sink.append_samples(device_id, samples).await {
                Ok(samples) => {
                    debug!("stored {samples} samples for {}", device.name);
                    PollOutcome::Stored { device_id, samples }
                }
                Err(e) => {
                    error!("failed to store samples for {}: {e}", device.name);
                    PollOutcome::StoreFailed {
                        device_id,
                        message: e.to_string(),
                    }
                }
            }
        }
        SystemStatus::Offline { reason } => {
            warn!("{} is offline: {reason}", device.display());
            PollOutcome::Offline { device_id, reason }
        }
        SystemStatus::Error { message } => {
            warn!("polling {} failed: {message}", device.display());
            PollOutcome::Failed { device_id, message }
        }
    }
}
