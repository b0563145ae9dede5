//! Collection cycles over real sessions
//!
//! - Online devices store one batch of samples under one timestamp
//! - Offline devices are skipped without holding up the rest
//! - Retention pruning only removes old samples

use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use tikmon::actors::{MetricsCollector, PollOutcome};
use tikmon::config::SchedulerConfig;
use tikmon::directory::{MapSettings, StaticDirectory};
use tikmon::monitor::{Monitor, MonitorParts};
use tikmon::notify::Dispatcher;
use tikmon::storage::{MemoryBackend, MetricsSink, SampleQuery, Storage};
use tikmon::{Device, MetricCategory};
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

fn monitor_for(devices: Vec<Device>, backend: Arc<MemoryBackend>, settings: MapSettings) -> Monitor {
    let directory = Arc::new(StaticDirectory::new(devices, vec![]));
    let settings = Arc::new(settings);
    Monitor::new(
        MonitorParts {
            devices: directory.clone(),
            rules: directory,
            settings: settings.clone(),
            storage: Storage::from_backend(backend),
            probe: Arc::new(test_client()),
            dispatcher: Arc::new(Dispatcher::new(settings)),
        },
        SchedulerConfig::default(),
        30,
    )
}

#[tokio::test]
async fn test_collection_cycle_skips_offline_device() {
    let first = MockRouter::start(RouterScript::healthy(12)).await;
    let second = MockRouter::start(RouterScript::healthy(64)).await;
    let devices = vec![
        first.device(1, "core-1"),
        unreachable_device(2, "branch").await,
        second.device(3, "core-2"),
    ];
    let backend = Arc::new(MemoryBackend::new());
    let monitor = monitor_for(devices, backend.clone(), MapSettings::default());

    let stored = monitor.run_collection_cycle().await.unwrap();

    assert_eq!(stored, 2);
    assert_eq!(backend.sample_count().await, 18);

    let cpu = backend
        .query_samples(SampleQuery::device(3).metric(MetricCategory::Cpu, "load"))
        .await
        .unwrap();
    assert_eq!(cpu.len(), 1);
    assert_eq!(cpu[0].value, 64.0);

    let offline = backend.query_samples(SampleQuery::device(2)).await.unwrap();
    assert!(offline.is_empty());
}

#[tokio::test]
async fn test_samples_of_one_poll_share_timestamp() {
    let router = MockRouter::start(RouterScript::healthy(30)).await;
    let backend = Arc::new(MemoryBackend::new());
    let collector = MetricsCollector::new(Arc::new(test_client()), backend.clone(), 4);

    let outcome = collector.poll_device(&router.device(1, "core-1")).await;
    assert_eq!(outcome, PollOutcome::Stored { device_id: 1, samples: 9 });

    let samples = backend.query_samples(SampleQuery::device(1)).await.unwrap();
    assert!(samples.iter().all(|s| s.timestamp == samples[0].timestamp));
}

#[tokio::test]
async fn test_cancelled_cycle_polls_nothing() {
    let router = MockRouter::start(RouterScript::healthy(30)).await;
    let backend = Arc::new(MemoryBackend::new());
    let collector = MetricsCollector::new(Arc::new(test_client()), backend.clone(), 1);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let stored = collector
        .collect_all(vec![router.device(1, "a"), router.device(2, "b")], &cancel)
        .await;

    assert_eq!(stored, 0);
    assert_eq!(router.logins(), 0);
}

#[tokio::test]
async fn test_poll_unknown_device_fails() {
    let monitor = monitor_for(vec![], Arc::new(MemoryBackend::new()), MapSettings::default());

    let result = monitor.poll_device(99).await;

    assert!(result.unwrap_err().to_string().contains("device 99"));
}

#[tokio::test]
async fn test_prune_uses_retention_setting() {
    let backend = Arc::new(MemoryBackend::new());
    let now = Utc::now();
    backend
        .append_samples(
            1,
            vec![
                cpu_sample(1, 10.0, now - Duration::days(10)),
                cpu_sample(1, 20.0, now - Duration::days(3)),
                cpu_sample(1, 30.0, now),
            ],
        )
        .await
        .unwrap();

    let settings: MapSettings = [("metrics_retention_days", "7")].into_iter().collect();
    let monitor = monitor_for(vec![], backend.clone(), settings);
    assert_eq!(monitor.retention_days(), 7);

    let deleted = monitor.prune_old_metrics().await.unwrap();

    assert_eq!(deleted, 1);
    assert_eq!(backend.sample_count().await, 2);
}

#[tokio::test]
async fn test_retention_falls_back_to_config() {
    let monitor = monitor_for(vec![], Arc::new(MemoryBackend::new()), MapSettings::default());
    assert_eq!(monitor.retention_days(), 30);
}

#[tokio::test]
async fn test_prune_rejects_out_of_range_retention() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .append_samples(1, vec![cpu_sample(1, 10.0, Utc::now())])
        .await
        .unwrap();

    let settings: MapSettings = [("metrics_retention_days", "18446744073709551615")]
        .into_iter()
        .collect();
    let monitor = monitor_for(vec![], backend.clone(), settings);

    let err = monitor.prune_old_metrics().await.unwrap_err();

    assert!(err.to_string().contains("out of range"));
    assert_eq!(backend.sample_count().await, 1);
}
