//! Webhook dispatcher: the one object through which the process notifies.
//!
//! Construct it once, call `start()` inside a tokio runtime, and hand out
//! references. Producers call the synchronous `notify*` methods from any
//! thread; a single worker task drains the priority queue and performs every
//! HTTP send, so no two sends ever overlap.
//!
//! Per-message lifecycle:
//! `queued → sending → {delivered | retry_wait → sending | failed}`

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use posco_common::config::NotifierConfig;
use posco_common::error::{AppError, Result};
use posco_common::types::{DeliveryStatus, Priority};

use crate::dedup::DedupCache;
use crate::message::{Message, MessageId};
use crate::queue::PriorityQueue;
use crate::retry::RetryPolicy;
use crate::router::EndpointRouter;
use crate::stats::{Counters, DeliveryRecord, DispatcherStats};
use crate::template::{self, Notification};
use crate::transport::Transport;

/// Terminal records kept for `history()`.
const HISTORY_LIMIT: usize = 100;

/// What happened to a `notify*` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued(MessageId),
    /// Identical content was sent within the dedup window.
    Suppressed { content_hash: String },
}

impl EnqueueOutcome {
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            EnqueueOutcome::Queued(id) => Some(*id),
            EnqueueOutcome::Suppressed { .. } => None,
        }
    }
}

/// Pre-rendered text with a free-form category name.
#[derive(Debug, Clone, Default)]
pub struct RawNotification {
    pub category: String,
    pub title: String,
    pub body: String,
    pub priority: Option<Priority>,
}

#[derive(Default)]
struct State {
    counters: Counters,
    failed: Vec<Message>,
    history: VecDeque<DeliveryRecord>,
    statuses: HashMap<MessageId, DeliveryStatus>,
    in_flight: Option<MessageId>,
    /// Attempts made for the in-flight message.
    in_flight_attempts: u32,
}

struct Shared {
    queue: PriorityQueue,
    dedup: DedupCache,
    router: EndpointRouter,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    bot_icon_url: String,
    state: Mutex<State>,
    /// Messages queued or in flight.
    pending: watch::Sender<usize>,
    accepting: AtomicBool,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, id: MessageId, status: DeliveryStatus) {
        self.state().statuses.insert(id, status);
    }

    fn record_attempt(&self, is_retry: bool) {
        let mut state = self.state();
        state.counters.attempts += 1;
        state.in_flight_attempts += 1;
        if is_retry {
            state.counters.retries += 1;
        }
    }

    fn finish(&self, outcome: DeliveryOutcome) {
        let id = outcome.message.id();
        {
            let mut state = self.state();
            state.statuses.remove(&id);
            state.in_flight = None;

            match outcome.status {
                Some(status) => {
                    let now = Utc::now();
                    if status == DeliveryStatus::Delivered {
                        state.counters.delivered += 1;
                        state.counters.last_delivery_at = Some(now);
                    } else {
                        state.counters.failed += 1;
                        state.failed.push(outcome.message.clone());
                    }
                    if state.history.len() >= HISTORY_LIMIT {
                        state.history.pop_front();
                    }
                    state.history.push_back(DeliveryRecord {
                        message: outcome.message,
                        status,
                        attempts: outcome.attempts,
                        last_error: outcome.last_error,
                        finished_at: now,
                    });
                }
                None => state.counters.dropped += 1,
            }
        }
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Result of one delivery run. `status` is `None` when shutdown interrupted a backoff.
struct DeliveryOutcome {
    message: Message,
    status: Option<DeliveryStatus>,
    attempts: u32,
    last_error: Option<String>,
}

pub struct WebhookDispatcher {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WebhookDispatcher {
    /// Build a dispatcher. Fails only on invalid static configuration.
    pub fn new(config: &NotifierConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let router = EndpointRouter::new(&config.news_webhook_url, &config.ops_webhook_url)?;
        let (pending, _) = watch::channel(0usize);

        Ok(Self {
            shared: Arc::new(Shared {
                queue: PriorityQueue::new(Some(config.queue_capacity)),
                dedup: DedupCache::new(config.dedup_window(), config.dedup_capacity),
                router,
                transport,
                policy: RetryPolicy::from_config(config),
                bot_icon_url: config.bot_icon_url.clone(),
                state: Mutex::new(State::default()),
                pending,
                accepting: AtomicBool::new(true),
            }),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        })
    }

    /// Spawn the delivery worker. Calling it again is a no-op.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            tracing::warn!("Delivery worker already running");
            return;
        }
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        *worker = Some(tokio::spawn(run_worker(shared, cancel)));
    }

    /// Render and enqueue with the category's default priority.
    pub fn notify(&self, notification: &Notification) -> Result<EnqueueOutcome> {
        let priority = notification.category().default_priority();
        self.notify_at(notification, priority, Utc::now())
    }

    pub fn notify_with_priority(
        &self,
        notification: &Notification,
        priority: Priority,
    ) -> Result<EnqueueOutcome> {
        self.notify_at(notification, priority, Utc::now())
    }

    /// Render at `now`, route, dedup-check, and enqueue.
    pub fn notify_at(
        &self,
        notification: &Notification,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome> {
        let rendered = template::render(notification, now);
        let route = self.shared.router.route(rendered.bot_category);
        let message = Message::new(rendered, priority, route, self.shared.policy.max_retries, now);
        self.enqueue(message, true)
    }

    /// Enqueue pre-rendered text. Unknown categories go to the operations webhook.
    pub fn notify_raw(&self, raw: RawNotification) -> Result<EnqueueOutcome> {
        let resolution = self.shared.router.resolve(&raw.category);
        let rendered = template::render_raw(resolution.category, &raw.title, &raw.body);
        let priority = raw
            .priority
            .unwrap_or_else(|| resolution.category.default_priority());
        let mut message = Message::new(
            rendered,
            priority,
            resolution.route,
            self.shared.policy.max_retries,
            Utc::now(),
        );
        if let Some(warning) = resolution.warning {
            message = message.with_routing_note(warning);
        }
        self.enqueue(message, true)
    }

    /// Re-enqueue a message (typically from `failed_messages`) with a fresh
    /// retry budget. Skips the dedup check and keeps the message id.
    pub fn requeue(&self, mut message: Message) -> Result<EnqueueOutcome> {
        message.retry_count = 0;
        let id = message.id();
        self.shared.state().failed.retain(|m| m.id() != id);
        self.enqueue(message, false)
    }

    fn enqueue(&self, message: Message, check_dedup: bool) -> Result<EnqueueOutcome> {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(AppError::ShutDown);
        }

        if check_dedup && self.shared.dedup.should_suppress(message.content_hash()) {
            self.shared.state().counters.suppressed += 1;
            tracing::debug!(
                category = %message.bot_category(),
                content_hash = message.content_hash(),
                "Duplicate notification dropped"
            );
            return Ok(EnqueueOutcome::Suppressed {
                content_hash: message.content_hash().to_string(),
            });
        }

        let id = message.id();
        let category = message.bot_category();
        let priority = message.priority();
        let content_hash = message.content_hash().to_string();

        self.shared.set_status(id, DeliveryStatus::Queued);
        self.shared.pending.send_modify(|n| *n += 1);

        if let Err(e) = self.shared.queue.push(message) {
            self.shared.state().statuses.remove(&id);
            self.shared.pending.send_modify(|n| *n = n.saturating_sub(1));
            if check_dedup {
                self.shared.dedup.forget(&content_hash);
            }
            tracing::warn!(message_id = %id, error = %e, "Notification rejected");
            return Err(e);
        }

        self.shared.state().counters.enqueued += 1;
        tracing::debug!(
            message_id = %id,
            category = %category,
            priority = %priority,
            "Notification queued"
        );
        Ok(EnqueueOutcome::Queued(id))
    }

    pub fn stats(&self) -> DispatcherStats {
        let queue_len = self.shared.queue.len();
        let state = self.shared.state();
        state
            .counters
            .snapshot(queue_len, state.in_flight.is_some())
    }

    /// Messages whose retry budget ran out, oldest first.
    pub fn failed_messages(&self) -> Vec<Message> {
        self.shared.state().failed.clone()
    }

    /// Recent terminal deliveries, oldest first.
    pub fn history(&self) -> Vec<DeliveryRecord> {
        self.shared.state().history.iter().cloned().collect()
    }

    /// Current or last known state of a message.
    pub fn status(&self, id: MessageId) -> Option<DeliveryStatus> {
        let state = self.shared.state();
        state.statuses.get(&id).copied().or_else(|| {
            state
                .history
                .iter()
                .rev()
                .find(|r| r.message.id() == id)
                .map(|r| r.status)
        })
    }

    /// Reset the dedup window for every content hash.
    pub fn clear_dedup(&self) {
        self.shared.dedup.clear();
    }

    /// Wait until nothing is queued or in flight. Requires `start()`.
    pub async fn drain(&self) {
        let mut rx = self.shared.pending.subscribe();
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    /// Stop the worker. Queued messages are dropped; an in-flight HTTP attempt
    /// is allowed to finish (bounded by the transport timeout).
    pub async fn shutdown(&self) {
        self.shared.accepting.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Delivery worker ended abnormally");
        }

        let cleared = self.shared.queue.close();
        let dropped = {
            let mut state = self.shared.state();
            state.statuses.clear();
            state.counters.dropped += cleared as u64;
            state.counters.dropped
        };
        self.shared.pending.send_replace(0);

        tracing::info!(dropped, "Webhook dispatcher shut down");
    }
}

impl Drop for WebhookDispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(shared: Arc<Shared>, cancel: CancellationToken) {
    tracing::info!(transport = shared.transport.name(), "Webhook delivery worker started");

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = shared.queue.pop() => message,
        };

        let id = message.id();
        {
            let mut state = shared.state();
            state.statuses.insert(id, DeliveryStatus::Sending);
            state.in_flight = Some(id);
            state.in_flight_attempts = 0;
        }

        // Each delivery runs in its own task so a panic is contained to one message.
        let task = tokio::spawn(deliver(shared.clone(), message.clone(), cancel.clone()));
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(message_id = %id, error = %e, "Delivery task aborted");
                let attempts = shared.state().in_flight_attempts;
                DeliveryOutcome {
                    message,
                    status: Some(DeliveryStatus::Failed),
                    attempts,
                    last_error: Some(e.to_string()),
                }
            }
        };
        shared.finish(outcome);
    }

    tracing::info!("Webhook delivery worker stopped");
}

async fn deliver(shared: Arc<Shared>, mut message: Message, cancel: CancellationToken) -> DeliveryOutcome {
    let id = message.id();
    let payload = message.to_payload(&shared.bot_icon_url);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        shared.record_attempt(message.retry_count() > 0);

        let error = match shared.transport.post(message.endpoint(), &payload).await {
            Ok(200) => {
                tracing::info!(
                    message_id = %id,
                    category = %message.bot_category(),
                    endpoint = %message.endpoint_kind(),
                    attempt = attempts,
                    "Notification delivered"
                );
                return DeliveryOutcome {
                    message,
                    status: Some(DeliveryStatus::Delivered),
                    attempts,
                    last_error: None,
                };
            }
            Ok(status) => AppError::DeliveryTransient(format!("HTTP status {}", status)),
            Err(e) => e,
        };

        if !message.can_retry() {
            let permanent = AppError::DeliveryPermanent {
                attempts,
                reason: error.to_string(),
            };
            tracing::error!(
                message_id = %id,
                category = %message.bot_category(),
                error = %permanent,
                "Notification moved to failed messages"
            );
            return DeliveryOutcome {
                message,
                status: Some(DeliveryStatus::Failed),
                attempts,
                last_error: Some(permanent.to_string()),
            };
        }

        let delay = shared.policy.backoff(message.retry_count());
        tracing::warn!(
            message_id = %id,
            attempt = attempts,
            retry_count = message.retry_count(),
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Delivery attempt failed, retrying"
        );
        shared.set_status(id, DeliveryStatus::RetryWait);

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(message_id = %id, "Shutdown during backoff, message dropped");
                return DeliveryOutcome {
                    message,
                    status: None,
                    attempts,
                    last_error: Some(error.to_string()),
                };
            }
            _ = tokio::time::sleep(delay) => {}
        }

        message.retry_count += 1;
        shared.set_status(id, DeliveryStatus::Sending);
    }
}
