//! Recurring jobs driven by the scheduler actor

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tikmon::actors::SchedulerHandle;
use tikmon::actors::scheduler::{CHECK_ALERTS, CLEAR_OLD_METRICS, COLLECT_METRICS};
use tikmon::actors::Trigger;
use tikmon::config::SchedulerConfig;
use tikmon::directory::{MapSettings, StaticDirectory};
use tikmon::monitor::{Monitor, MonitorParts};
use tikmon::notify::Dispatcher;
use tikmon::storage::{MemoryBackend, Storage};
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

use crate::helpers::*;

async fn wait_for_samples(backend: &MemoryBackend, count: usize) {
    timeout(Duration::from_secs(5), async {
        while backend.sample_count().await < count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("samples were not collected in time");
}

#[tokio::test]
async fn test_monitor_jobs_run_on_schedule() {
    let router = MockRouter::start(RouterScript::healthy(50)).await;
    let backend = Arc::new(MemoryBackend::new());
    let directory = Arc::new(StaticDirectory::new(vec![router.device(1, "core-1")], vec![]));
    let settings = Arc::new(MapSettings::default());

    let config = SchedulerConfig {
        collection_interval: 1,
        evaluation_interval: 1,
        ..SchedulerConfig::default()
    };
    let monitor = Arc::new(Monitor::new(
        MonitorParts {
            devices: directory.clone(),
            rules: directory,
            settings: settings.clone(),
            storage: Storage::from_backend(backend.clone()),
            probe: Arc::new(test_client()),
            dispatcher: Arc::new(Dispatcher::new(settings)),
        },
        config,
        30,
    ));

    let scheduler = SchedulerHandle::spawn(Duration::from_secs(2));
    assert_ok!(monitor.schedule(&scheduler).await);

    let ids: Vec<String> = scheduler.jobs().await.unwrap().into_iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![CHECK_ALERTS, CLEAR_OLD_METRICS, COLLECT_METRICS]);

    // The first collection runs right away, the next one a second later
    wait_for_samples(&backend, 9).await;
    wait_for_samples(&backend, 18).await;
    assert!(router.logins() >= 2);

    monitor.cancellation_token().cancel();
    let report = assert_ok!(scheduler.shutdown().await);
    assert_eq!(report.stopped.len() + report.aborted.len(), 3);

    // The actor is gone after shutdown
    assert_err!(scheduler.jobs().await);
}

#[tokio::test]
async fn test_scheduling_twice_replaces_jobs() {
    let scheduler = SchedulerHandle::spawn(Duration::from_secs(1));
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let runs = runs.clone();
        scheduler
            .register(COLLECT_METRICS, Trigger::Every(Duration::from_secs(3600)), move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    let jobs = scheduler.jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].active);
    // The replaced job may be aborted before its first run
    let fired = runs.load(Ordering::SeqCst);
    assert!((1..=2).contains(&fired));

    assert!(scheduler.remove(COLLECT_METRICS).await.unwrap());
    assert!(!scheduler.remove(COLLECT_METRICS).await.unwrap());
    assert_ok!(scheduler.shutdown().await);
}

#[tokio::test]
async fn test_zero_collection_interval_fails_to_schedule() {
    let backend = Arc::new(MemoryBackend::new());
    let directory = Arc::new(StaticDirectory::new(vec![], vec![]));
    let settings = Arc::new(MapSettings::default());

    let config = SchedulerConfig {
        collection_interval: 0,
        ..SchedulerConfig::default()
    };
    let monitor = Arc::new(Monitor::new(
        MonitorParts {
            devices: directory.clone(),
            rules: directory,
            settings: settings.clone(),
            storage: Storage::from_backend(backend),
            probe: Arc::new(test_client()),
            dispatcher: Arc::new(Dispatcher::new(settings)),
        },
        config,
        30,
    ));

    let scheduler = SchedulerHandle::spawn(Duration::from_secs(1));
    let err = assert_err!(monitor.schedule(&scheduler).await);

    assert!(err.to_string().contains("collection_interval"));
    assert!(scheduler.jobs().await.unwrap().is_empty());
    assert_ok!(scheduler.shutdown().await);
}
