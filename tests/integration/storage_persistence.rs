//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Collected samples survive reopening the database
//! - Alert events keep their ids and fields
//! - Retention pruning goes through the monitor

use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use tikmon::config::{SchedulerConfig, StorageConfig};
use tikmon::directory::{MapSettings, StaticDirectory};
use tikmon::monitor::{Monitor, MonitorParts};
use tikmon::notify::Dispatcher;
use tikmon::storage::sqlite::SqliteBackend;
use tikmon::storage::{self, SampleQuery, Storage};
use tikmon::{AlertEvent, MetricCategory};

use crate::helpers::*;

fn sqlite_config(path: std::path::PathBuf) -> StorageConfig {
    StorageConfig::Sqlite {
        path,
        retention_days: 30,
    }
}

#[tokio::test]
async fn test_collected_samples_survive_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("tikmon.db");
    let router = MockRouter::start(RouterScript::healthy(73)).await;

    {
        let storage = storage::open(&sqlite_config(db_path.clone())).await.unwrap();
        let directory = Arc::new(StaticDirectory::new(vec![router.device(5, "edge")], vec![]));
        let settings = Arc::new(MapSettings::default());
        let monitor = Monitor::new(
            MonitorParts {
                devices: directory.clone(),
                rules: directory,
                settings: settings.clone(),
                storage,
                probe: Arc::new(test_client()),
                dispatcher: Arc::new(Dispatcher::new(settings)),
            },
            SchedulerConfig::default(),
            30,
        );

        assert_eq!(monitor.run_collection_cycle().await.unwrap(), 1);
        monitor.storage().metrics.close().await.unwrap();
    }

    let reopened = storage::open(&sqlite_config(db_path)).await.unwrap();
    let cpu = reopened
        .metrics
        .query_samples(SampleQuery::device(5).metric(MetricCategory::Cpu, "load"))
        .await
        .unwrap();

    assert_eq!(cpu.len(), 1);
    assert_eq!(cpu[0].value, 73.0);

    let all = reopened.metrics.query_samples(SampleQuery::device(5)).await.unwrap();
    assert_eq!(all.len(), 9);
}

#[tokio::test]
async fn test_alert_events_round_trip() {
    let temp_dir = tempdir().unwrap();
    let backend = Arc::new(SqliteBackend::new(temp_dir.path().join("alerts.db")).await.unwrap());
    let storage = Storage::from_backend(backend);

    let rule = cpu_rule(3, 5, 80.0);
    let at = Utc::now();
    let first = storage
        .alerts
        .record_alert(AlertEvent::from_breach(&rule, 88.5, at - Duration::minutes(5)))
        .await
        .unwrap();
    let second = storage
        .alerts
        .record_alert(AlertEvent::from_breach(&rule, 91.0, at))
        .await
        .unwrap();

    assert!(second.id > first.id);

    let recent = storage.alerts.recent_alerts(Some(5), 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].value, 91.0);
    assert_eq!(recent[0].operator, rule.operator);
    assert_eq!(recent[0].metric, "cpu_load");
    assert!(recent.iter().all(|e| !e.acknowledged));

    assert!(storage.alerts.recent_alerts(Some(6), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retention_prune_on_sqlite() {
    let temp_dir = tempdir().unwrap();
    let storage = storage::open(&sqlite_config(temp_dir.path().join("prune.db")))
        .await
        .unwrap();
    let now = Utc::now();

    storage
        .metrics
        .append_samples(
            1,
            vec![
                cpu_sample(1, 1.0, now - Duration::days(45)),
                cpu_sample(1, 2.0, now - Duration::days(31)),
                cpu_sample(1, 3.0, now - Duration::days(29)),
                cpu_sample(1, 4.0, now),
            ],
        )
        .await
        .unwrap();

    let deleted = storage
        .metrics
        .prune_before(now - Duration::days(30))
        .await
        .unwrap();

    assert_eq!(deleted, 2);
    let left = storage.metrics.query_samples(SampleQuery::device(1)).await.unwrap();
    assert_eq!(left.iter().map(|s| s.value).collect::<Vec<_>>(), vec![4.0, 3.0]);
}
