//! End-to-end tests for the webhook dispatcher.
//!
//! Most tests use `RecordingTransport`; the HTTP tests start a local axum
//! server standing in for the Dooray webhook.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};

use posco_common::config::NotifierConfig;
use posco_common::types::{DeliveryStatus, NewsItem, NewsSource, Priority};
use posco_notifier::template::{
    ComparisonData, DelayData, ErrorData, NoDataData, SourceSnapshot, StatusData, TestData,
};
use posco_notifier::transport::{RecordingTransport, ScriptedReply};
use posco_notifier::{
    DoorayPayload, EnqueueOutcome, HttpTransport, Notification, Transport, WebhookDispatcher,
};

// ============================================================
// Helpers
// ============================================================

const NEWS_URL: &str = "https://hook.dooray.com/services/news";
const OPS_URL: &str = "https://hook.dooray.com/services/ops";

fn test_config() -> NotifierConfig {
    let mut config = NotifierConfig::with_endpoints(NEWS_URL, OPS_URL);
    config.retry_base_delay_ms = 1;
    config.retry_max_delay_ms = 10;
    config.dedup_window_secs = 60;
    config
}

async fn drained(dispatcher: &WebhookDispatcher) {
    tokio::time::timeout(Duration::from_secs(10), dispatcher.drain())
        .await
        .expect("dispatcher did not drain in time");
}

fn error_notification() -> Notification {
    Notification::Error(ErrorData {
        component: Some("뉴스 모니터".to_string()),
        error: Some("API 연결 실패".to_string()),
        detail: Some("connection refused".to_string()),
    })
}

fn status_notification() -> Notification {
    Notification::StatusNotice(StatusData {
        sources: vec![SourceSnapshot {
            source: NewsSource::KospiClose,
            item: Some(NewsItem {
                title: Some("[증시마감] 코스피 상승 마감".to_string()),
                content: None,
                date: Some("20250812".to_string()),
                time: Some("154000".to_string()),
            }),
        }],
    })
}

fn no_data_notification() -> Notification {
    Notification::NoDataNotice(NoDataData {
        source: Some(NewsSource::ExchangeRate),
        last_checked: None,
        reason: Some("새 기사 없음".to_string()),
    })
}

async fn wait_until(mut ready: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn bot_names(transport: &RecordingTransport) -> Vec<String> {
    transport
        .posts()
        .into_iter()
        .map(|p| p.payload.bot_name)
        .collect()
}

// ============================================================
// Scenarios
// ============================================================

#[tokio::test]
async fn test_critical_error_delivered_before_normal_status() {
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = WebhookDispatcher::new(&test_config(), transport.clone()).unwrap();
    dispatcher.start();

    dispatcher
        .notify_with_priority(&error_notification(), Priority::Critical)
        .unwrap();
    dispatcher
        .notify_with_priority(&status_notification(), Priority::Normal)
        .unwrap();
    drained(&dispatcher).await;

    assert_eq!(
        bot_names(&transport),
        vec!["POSCO 워치햄스터 ❌".to_string(), "POSCO 뉴스 📊".to_string()]
    );
    let posts = transport.posts();
    assert_eq!(posts[0].endpoint, OPS_URL);
    assert_eq!(posts[1].endpoint, NEWS_URL);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_identical_no_data_notice_posted_once() {
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = WebhookDispatcher::new(&test_config(), transport.clone()).unwrap();
    dispatcher.start();

    let outcomes: Vec<EnqueueOutcome> = (0..3)
        .map(|_| dispatcher.notify(&no_data_notification()).unwrap())
        .collect();
    drained(&dispatcher).await;

    assert!(matches!(outcomes[0], EnqueueOutcome::Queued(_)));
    assert!(matches!(outcomes[1], EnqueueOutcome::Suppressed { .. }));
    assert!(matches!(outcomes[2], EnqueueOutcome::Suppressed { .. }));
    assert_eq!(transport.post_count(), 1);

    let stats = dispatcher.stats();
    assert_eq!(stats.enqueued, 1);
    assert_eq!(stats.suppressed, 2);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_two_failures_then_success_is_delivered_with_two_retries() {
    let transport = Arc::new(RecordingTransport::with_statuses([500, 500, 200]));
    let dispatcher = WebhookDispatcher::new(&test_config(), transport.clone()).unwrap();
    dispatcher.start();

    let id = dispatcher
        .notify(&status_notification())
        .unwrap()
        .message_id()
        .unwrap();
    drained(&dispatcher).await;

    assert_eq!(dispatcher.status(id), Some(DeliveryStatus::Delivered));
    let record = dispatcher.history().pop().unwrap();
    assert_eq!(record.message.id(), id);
    assert_eq!(record.status, DeliveryStatus::Delivered);
    assert_eq!(record.message.retry_count(), 2);
    assert_eq!(record.attempts, 3);
    assert_eq!(transport.post_count(), 3);
    assert!(dispatcher.failed_messages().is_empty());
    dispatcher.shutdown().await;
}

// ============================================================
// Properties
// ============================================================

#[tokio::test]
async fn test_always_500_attempts_max_retries_plus_one_then_fails() {
    let transport = Arc::new(RecordingTransport::always(500, 100));
    let dispatcher = WebhookDispatcher::new(&test_config(), transport.clone()).unwrap();
    dispatcher.start();

    let id = dispatcher
        .notify(&error_notification())
        .unwrap()
        .message_id()
        .unwrap();
    drained(&dispatcher).await;

    assert_eq!(transport.post_count(), 4);
    let failed = dispatcher.failed_messages();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id(), id);
    assert_eq!(dispatcher.status(id), Some(DeliveryStatus::Failed));

    // not retried again without an explicit requeue
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.post_count(), 4);

    let stats = dispatcher.stats();
    assert_eq!(stats.attempts, 4);
    assert_eq!(stats.retries, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.success_rate, 0.0);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_network_errors_are_retried() {
    let transport = Arc::new(RecordingTransport::new());
    transport.push_reply(ScriptedReply::NetworkError("connection reset".to_string()));
    let dispatcher = WebhookDispatcher::new(&test_config(), transport.clone()).unwrap();
    dispatcher.start();

    dispatcher.notify(&error_notification()).unwrap();
    drained(&dispatcher).await;

    assert_eq!(transport.post_count(), 2);
    assert_eq!(dispatcher.stats().delivered, 1);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_mixed_priorities_drain_in_stable_priority_order() {
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = WebhookDispatcher::new(&test_config(), transport.clone()).unwrap();

    let plan = [
        ("low-a", Priority::Low),
        ("normal-a", Priority::Normal),
        ("critical-a", Priority::Critical),
        ("low-b", Priority::Low),
        ("high-a", Priority::High),
        ("critical-b", Priority::Critical),
        ("normal-b", Priority::Normal),
    ];
    for (note, priority) in plan {
        dispatcher
            .notify_with_priority(
                &Notification::Test(TestData {
                    note: Some(note.to_string()),
                }),
                priority,
            )
            .unwrap();
    }

    // queue snapshot is complete before the worker runs
    dispatcher.start();
    drained(&dispatcher).await;

    let order: Vec<String> = transport
        .posts()
        .into_iter()
        .map(|p| {
            let body = &p.payload.attachments[0].text;
            plan.iter()
                .find(|(note, _)| body.contains(note))
                .map(|(note, _)| note.to_string())
                .unwrap()
        })
        .collect();
    assert_eq!(
        order,
        vec!["critical-a", "critical-b", "high-a", "normal-a", "normal-b", "low-a", "low-b"]
    );
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_allowed_again_after_window() {
    let mut config = test_config();
    config.dedup_window_secs = 1;
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = WebhookDispatcher::new(&config, transport.clone()).unwrap();
    dispatcher.start();

    let now = Utc.with_ymd_and_hms(2025, 8, 12, 7, 0, 0).unwrap();
    let notification = no_data_notification();
    let first = dispatcher.notify_at(&notification, Priority::Low, now).unwrap();
    let second = dispatcher.notify_at(&notification, Priority::Low, now).unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let third = dispatcher.notify_at(&notification, Priority::Low, now).unwrap();
    drained(&dispatcher).await;

    assert!(matches!(first, EnqueueOutcome::Queued(_)));
    assert!(matches!(second, EnqueueOutcome::Suppressed { .. }));
    assert!(matches!(third, EnqueueOutcome::Queued(_)));
    assert_eq!(transport.post_count(), 2);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_resending_same_message_counts_each_attempt() {
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = WebhookDispatcher::new(&test_config(), transport.clone()).unwrap();
    dispatcher.start();

    dispatcher
        .notify(&Notification::Comparison(ComparisonData {
            source: Some(NewsSource::NewyorkMarketWatch),
            current: None,
            previous: None,
        }))
        .unwrap();
    drained(&dispatcher).await;
    let first = dispatcher.stats();

    let message = dispatcher.history().pop().unwrap().message;
    dispatcher.requeue(message.clone()).unwrap();
    drained(&dispatcher).await;
    let second = dispatcher.stats();

    assert_eq!(first.attempts, 1);
    assert_eq!(second.attempts, 2);
    assert_eq!(second.delivered, 2);
    assert_eq!(second.enqueued, 2);
    assert_eq!(transport.post_count(), 2);
    let ids: Vec<_> = dispatcher
        .history()
        .into_iter()
        .map(|r| r.message.id())
        .collect();
    assert_eq!(ids, vec![message.id(), message.id()]);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_producers_on_many_threads() {
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = Arc::new(WebhookDispatcher::new(&test_config(), transport.clone()).unwrap());
    dispatcher.start();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            std::thread::spawn(move || {
                dispatcher
                    .notify(&Notification::DelayNotice(DelayData {
                        source: Some(NewsSource::KospiClose),
                        delay_minutes: Some(i),
                        item: None,
                    }))
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    drained(&dispatcher).await;

    assert_eq!(transport.post_count(), 8);
    assert_eq!(dispatcher.stats().delivered, 8);
    dispatcher.shutdown().await;
}

// ============================================================
// Failure isolation and shutdown
// ============================================================

/// Panics on the first post, answers 200 afterwards.
#[derive(Default)]
struct PanicOnce {
    tripped: AtomicBool,
    posts: AtomicUsize,
}

#[async_trait]
impl Transport for PanicOnce {
    async fn post(&self, _endpoint: &str, _payload: &DoorayPayload) -> posco_common::error::Result<u16> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("transport blew up");
        }
        Ok(200)
    }

    fn name(&self) -> &'static str {
        "panic-once"
    }
}

/// Answers 200 after a fixed delay.
#[derive(Default)]
struct SlowOk {
    started: AtomicUsize,
}

#[async_trait]
impl Transport for SlowOk {
    async fn post(&self, _endpoint: &str, _payload: &DoorayPayload) -> posco_common::error::Result<u16> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(200)
    }

    fn name(&self) -> &'static str {
        "slow-ok"
    }
}

#[tokio::test]
async fn test_panic_in_send_fails_only_that_message() {
    let transport = Arc::new(PanicOnce::default());
    let dispatcher = WebhookDispatcher::new(&test_config(), transport.clone()).unwrap();

    let first = dispatcher
        .notify_with_priority(&error_notification(), Priority::Critical)
        .unwrap()
        .message_id()
        .unwrap();
    let second = dispatcher
        .notify_with_priority(&status_notification(), Priority::Normal)
        .unwrap()
        .message_id()
        .unwrap();

    dispatcher.start();
    drained(&dispatcher).await;

    assert_eq!(dispatcher.status(first), Some(DeliveryStatus::Failed));
    assert_eq!(dispatcher.status(second), Some(DeliveryStatus::Delivered));
    let failed = dispatcher.failed_messages();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id(), first);

    let stats = dispatcher.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.attempts, 2);
    assert_eq!(transport.posts.load(Ordering::SeqCst), 2);

    // the aborted attempt is still recorded
    let record = dispatcher
        .history()
        .into_iter()
        .find(|r| r.message.id() == first)
        .unwrap();
    assert_eq!(record.attempts, 1);
    assert!(record.last_error.is_some());
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_interrupts_backoff_and_drops_queued() {
    let mut config = test_config();
    config.retry_base_delay_ms = 5_000;
    config.retry_max_delay_ms = 5_000;
    let transport = Arc::new(RecordingTransport::with_statuses([500]));
    let dispatcher = WebhookDispatcher::new(&config, transport.clone()).unwrap();

    let waiting = dispatcher
        .notify_with_priority(&error_notification(), Priority::Critical)
        .unwrap()
        .message_id()
        .unwrap();
    dispatcher
        .notify_with_priority(&status_notification(), Priority::Normal)
        .unwrap();
    dispatcher.start();

    wait_until(|| dispatcher.status(waiting) == Some(DeliveryStatus::RetryWait)).await;

    tokio::time::timeout(Duration::from_secs(1), dispatcher.shutdown())
        .await
        .expect("shutdown waited out the backoff");

    assert_eq!(transport.post_count(), 1);
    let stats = dispatcher.stats();
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.queue_len, 0);
    assert!(dispatcher.failed_messages().is_empty());
    drained(&dispatcher).await;
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_send_finish() {
    let transport = Arc::new(SlowOk::default());
    let dispatcher = WebhookDispatcher::new(&test_config(), transport.clone()).unwrap();
    dispatcher.start();

    let id = dispatcher
        .notify(&status_notification())
        .unwrap()
        .message_id()
        .unwrap();
    wait_until(|| transport.started.load(Ordering::SeqCst) == 1).await;
    dispatcher.shutdown().await;

    assert_eq!(dispatcher.status(id), Some(DeliveryStatus::Delivered));
    let stats = dispatcher.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.dropped, 0);
    assert_eq!(transport.started.load(Ordering::SeqCst), 1);
}

// ============================================================
// Real HTTP against a mock Dooray webhook
// ============================================================

#[derive(Clone, Default)]
struct MockHook {
    bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    failures_left: Arc<AtomicUsize>,
}

async fn hook(State(mock): State<MockHook>, Json(body): Json<serde_json::Value>) -> StatusCode {
    mock.bodies.lock().unwrap().push(body);
    let failing = mock
        .failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn slow_hook() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(2)).await;
    StatusCode::OK
}

async fn closed_hook() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

async fn spawn_mock(failures: usize) -> (String, MockHook) {
    let mock = MockHook::default();
    mock.failures_left.store(failures, Ordering::SeqCst);

    let app = Router::new()
        .route("/services/news", post(hook))
        .route("/services/ops", post(hook))
        .route("/services/slow", post(slow_hook))
        .route("/services/closed", post(closed_hook))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), mock)
}

#[tokio::test]
async fn test_http_delivery_matches_dooray_wire_format() {
    let (base, mock) = spawn_mock(1).await;
    let mut config = NotifierConfig::with_endpoints(
        format!("{}/services/news", base),
        format!("{}/services/ops", base),
    );
    config.bot_icon_url = "https://static.example.com/posco.png".to_string();
    config.retry_base_delay_ms = 1;
    config.retry_max_delay_ms = 10;

    let transport = Arc::new(HttpTransport::new(config.http_timeout()).unwrap());
    let dispatcher = WebhookDispatcher::new(&config, transport).unwrap();
    dispatcher.start();

    dispatcher.notify(&status_notification()).unwrap();
    drained(&dispatcher).await;

    let bodies = mock.bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 2, "first attempt answered 500, second 200");
    let body = &bodies[1];
    assert_eq!(body["botName"], "POSCO 뉴스 📊");
    assert_eq!(body["botIconImage"], "https://static.example.com/posco.png");
    assert!(body["text"].as_str().unwrap().starts_with("📊 POSCO 뉴스 정기 상태"));
    assert_eq!(body["attachments"][0]["color"], "#17a2b8");
    assert!(
        body["attachments"][0]["text"]
            .as_str()
            .unwrap()
            .contains("증시마감")
    );

    let stats = dispatcher.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.retries, 1);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_http_timeout_is_transient() {
    let (base, _mock) = spawn_mock(0).await;
    let transport = HttpTransport::new(Duration::from_millis(200)).unwrap();
    let payload = DoorayPayload {
        bot_name: "POSCO 테스트 🧪".to_string(),
        bot_icon_image: String::new(),
        text: "timeout".to_string(),
        attachments: vec![],
    };

    let err = transport
        .post(&format!("{}/services/slow", base), &payload)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_http_405_is_not_delivery() {
    let (base, mock) = spawn_mock(0).await;
    let mut config = NotifierConfig::with_endpoints(
        format!("{}/services/closed", base),
        format!("{}/services/ops", base),
    );
    config.max_retries = 1;
    config.retry_base_delay_ms = 1;
    config.retry_max_delay_ms = 10;

    let transport = Arc::new(HttpTransport::new(config.http_timeout()).unwrap());
    let dispatcher = WebhookDispatcher::new(&config, transport).unwrap();
    dispatcher.start();

    let id = dispatcher
        .notify(&no_data_notification())
        .unwrap()
        .message_id()
        .unwrap();
    drained(&dispatcher).await;

    assert_eq!(dispatcher.status(id), Some(DeliveryStatus::Failed));
    assert_eq!(dispatcher.stats().attempts, 2);
    assert!(mock.bodies.lock().unwrap().is_empty());
    dispatcher.shutdown().await;
}
