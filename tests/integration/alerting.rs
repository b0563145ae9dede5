//! Alert evaluation end to end
//!
//! Router → collection → evaluation → alert record → email + Telegram

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use tikmon::actors::{AlertEvaluator, RuleOutcome};
use tikmon::config::SchedulerConfig;
use tikmon::directory::{MapSettings, StaticDirectory};
use tikmon::monitor::{Monitor, MonitorParts};
use tikmon::notify::chat::ChatClient;
use tikmon::notify::{ChannelOutcome, Dispatcher, MailSettings, Mailer, NotifyError, OutgoingMail};
use tikmon::storage::{AlertSink, MemoryBackend, MetricsSink};
use tikmon::{AlertRule, Device};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, _settings: &MailSettings, mail: &OutgoingMail) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

fn notify_settings() -> MapSettings {
    [
        ("email_enabled", "true"),
        ("chat_enabled", "true"),
        ("mail_server", "smtp.example.net"),
        ("mail_username", "noc@example.net"),
        ("mail_password", "pw"),
        ("mail_from", "tikmon@example.net"),
        ("telegram_bot_token", "123:abc"),
        ("telegram_chat_id", "-1001"),
    ]
    .into_iter()
    .collect()
}

fn notifying_rule(id: i64, device_id: i64, threshold: f64) -> AlertRule {
    let mut rule = cpu_rule(id, device_id, threshold);
    rule.notify_email = true;
    rule.notify_chat = true;
    rule.email_recipients = Some("ops@example.net, oncall@example.net".to_string());
    rule
}

struct Harness {
    monitor: Monitor,
    backend: Arc<MemoryBackend>,
    mailer: Arc<RecordingMailer>,
}

fn harness(devices: Vec<Device>, rules: Vec<AlertRule>, telegram: &MockServer) -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let mailer = Arc::new(RecordingMailer::default());
    let directory = Arc::new(StaticDirectory::new(devices, rules));
    let settings = Arc::new(notify_settings());
    let dispatcher = Dispatcher::new(settings.clone())
        .with_mailer(mailer.clone())
        .with_chat_client(ChatClient::default().with_telegram_api(telegram.uri()));

    let monitor = Monitor::new(
        MonitorParts {
            devices: directory.clone(),
            rules: directory,
            settings,
            storage: tikmon::storage::Storage::from_backend(backend.clone()),
            probe: Arc::new(test_client()),
            dispatcher: Arc::new(dispatcher),
        },
        SchedulerConfig::default(),
        30,
    );

    Harness {
        monitor,
        backend,
        mailer,
    }
}

#[tokio::test]
async fn test_breach_records_event_and_notifies() {
    let telegram = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bot123:abc/sendMessage"))
        .and(body_partial_json(serde_json::json!({ "chat_id": "-1001" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
        .expect(1)
        .mount(&telegram)
        .await;

    let router = MockRouter::start(RouterScript::healthy(85)).await;
    let device = router.device(4, "core-sw");
    let h = harness(vec![device], vec![notifying_rule(9, 4, 80.0)], &telegram);

    h.monitor.run_collection_cycle().await.unwrap();
    let raised = h.monitor.run_evaluation_cycle().await.unwrap();

    assert_eq!(raised, 1);

    let events = h.backend.recent_alerts(Some(4), 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].rule_id, 9);
    assert_eq!(events[0].value, 85.0);
    assert!(events[0].id.is_some());
    assert!(!events[0].acknowledged);

    let sent = h.mailer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["ops@example.net".to_string(), "oncall@example.net".to_string()]);
    assert_eq!(sent[0].subject, "Device Monitor Alert: CPU above 80");
    assert!(sent[0].body.contains("Current Value: 85"));
}

#[tokio::test]
async fn test_offline_device_raises_nothing() {
    let telegram = MockServer::start().await;
    let device = unreachable_device(4, "core-sw").await;
    let h = harness(vec![device], vec![notifying_rule(9, 4, 80.0)], &telegram);

    h.monitor.run_collection_cycle().await.unwrap();
    let raised = h.monitor.run_evaluation_cycle().await.unwrap();

    assert_eq!(raised, 0);
    assert!(h.backend.recent_alerts(None, 10).await.unwrap().is_empty());
    assert!(h.mailer.sent.lock().unwrap().is_empty());
    assert!(telegram.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_below_threshold_raises_nothing() {
    let telegram = MockServer::start().await;
    let router = MockRouter::start(RouterScript::healthy(40)).await;
    let h = harness(vec![router.device(4, "core-sw")], vec![notifying_rule(9, 4, 80.0)], &telegram);

    h.monitor.run_collection_cycle().await.unwrap();

    assert_eq!(h.monitor.run_evaluation_cycle().await.unwrap(), 0);
}

#[tokio::test]
async fn test_chat_failure_keeps_event_and_email() {
    let telegram = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("bot was blocked"))
        .mount(&telegram)
        .await;

    let router = MockRouter::start(RouterScript::healthy(95)).await;
    let device = router.device(4, "core-sw");
    let h = harness(vec![device.clone()], vec![], &telegram);
    h.monitor.run_collection_cycle().await.unwrap();

    let settings = Arc::new(notify_settings());
    let evaluator = AlertEvaluator::new(
        Arc::new(StaticDirectory::new(vec![device], vec![])),
        h.backend.clone(),
        h.backend.clone(),
        Arc::new(
            Dispatcher::new(settings)
                .with_mailer(h.mailer.clone())
                .with_chat_client(ChatClient::default().with_telegram_api(telegram.uri())),
        ),
        std::time::Duration::from_secs(180),
    );

    let outcome = evaluator.evaluate_rule(&notifying_rule(9, 4, 80.0), Utc::now()).await;

    let RuleOutcome::Breached { event, report: Some(report) } = outcome else {
        panic!("expected a breach with a dispatch report, got {outcome:?}");
    };
    assert_eq!(event.value, 95.0);
    assert!(report.email.is_delivered());
    assert!(matches!(report.chat, ChannelOutcome::Failed(NotifyError::Rejected { .. })));
    assert_eq!(h.backend.recent_alerts(None, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_duration_requires_whole_window() {
    let telegram = MockServer::start().await;
    let backend = Arc::new(MemoryBackend::new());
    let now = Utc::now();
    backend
        .append_samples(
            4,
            vec![
                cpu_sample(4, 90.0, now - Duration::seconds(240)),
                cpu_sample(4, 70.0, now - Duration::seconds(120)),
                cpu_sample(4, 91.0, now - Duration::seconds(10)),
            ],
        )
        .await
        .unwrap();

    let router = MockRouter::start(RouterScript::new()).await;
    let directory = Arc::new(StaticDirectory::new(vec![router.device(4, "core-sw")], vec![]));
    let evaluator = AlertEvaluator::new(
        directory,
        backend.clone(),
        backend.clone(),
        Arc::new(Dispatcher::new(Arc::new(MapSettings::default()))),
        std::time::Duration::from_secs(180),
    );

    let mut rule = cpu_rule(1, 4, 80.0);
    rule.duration = 300;
    assert!(matches!(
        evaluator.evaluate_rule(&rule, now).await,
        RuleOutcome::NotBreached { value } if value == 91.0
    ));

    rule.duration = 60;
    let outcome = evaluator.evaluate_rule(&rule, now).await;
    assert!(matches!(outcome, RuleOutcome::Breached { report: None, .. }));
    assert!(telegram.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_rule_for_missing_device_is_skipped() {
    let backend = Arc::new(MemoryBackend::new());
    let evaluator = AlertEvaluator::new(
        Arc::new(StaticDirectory::new(vec![], vec![])),
        backend.clone(),
        backend,
        Arc::new(Dispatcher::new(Arc::new(MapSettings::default()))),
        std::time::Duration::from_secs(180),
    );

    let outcome = evaluator.evaluate_rule(&cpu_rule(1, 42, 80.0), Utc::now()).await;

    assert!(matches!(outcome, RuleOutcome::DeviceMissing));
}

#[tokio::test]
async fn test_huge_duration_is_an_invalid_rule() {
    let backend = Arc::new(MemoryBackend::new());
    let now = Utc::now();
    backend
        .append_samples(4, vec![cpu_sample(4, 95.0, now)])
        .await
        .unwrap();

    let router = MockRouter::start(RouterScript::new()).await;
    let directory = Arc::new(StaticDirectory::new(vec![router.device(4, "core-sw")], vec![]));
    let evaluator = AlertEvaluator::new(
        directory,
        backend.clone(),
        backend.clone(),
        Arc::new(Dispatcher::new(Arc::new(MapSettings::default()))),
        std::time::Duration::from_secs(180),
    );

    let mut rule = cpu_rule(1, 4, 80.0);
    rule.duration = u64::MAX;

    let outcome = evaluator.evaluate_rule(&rule, now).await;

    assert!(matches!(outcome, RuleOutcome::InvalidRule(_)));
    assert!(backend.recent_alerts(None, 10).await.unwrap().is_empty());
    assert_eq!(evaluator.evaluate_all(&[rule]).await, 0);
}

#[tokio::test]
async fn test_hanging_chat_endpoint_times_out() {
    let hook = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(30)))
        .mount(&hook)
        .await;

    let router = MockRouter::start(RouterScript::healthy(95)).await;
    let device = router.device(4, "core-sw");
    let backend = Arc::new(MemoryBackend::new());
    let collector = tikmon::actors::MetricsCollector::new(Arc::new(test_client()), backend.clone(), 1);
    collector.poll_device(&device).await;

    let mut settings = notify_settings();
    settings.set("chat_provider", "webhook");
    settings.set("chat_webhook_url", format!("{}/hook", hook.uri()));
    settings.set("chat_timeout", "1");
    let mailer = Arc::new(RecordingMailer::default());
    let evaluator = AlertEvaluator::new(
        Arc::new(StaticDirectory::new(vec![device], vec![])),
        backend.clone(),
        backend.clone(),
        Arc::new(Dispatcher::new(Arc::new(settings)).with_mailer(mailer.clone())),
        std::time::Duration::from_secs(180),
    );

    let started = std::time::Instant::now();
    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        evaluator.evaluate_rule(&notifying_rule(9, 4, 80.0), Utc::now()),
    )
    .await
    .expect("evaluation hung on the chat endpoint");

    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    let RuleOutcome::Breached { report: Some(report), .. } = outcome else {
        panic!("expected a breach with a dispatch report, got {outcome:?}");
    };
    assert!(report.email.is_delivered());
    assert!(matches!(report.chat, ChannelOutcome::Failed(NotifyError::Transport(_))));
    assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    assert_eq!(backend.recent_alerts(None, 10).await.unwrap().len(), 1);
}
