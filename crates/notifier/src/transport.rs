//! Outbound HTTP capability.
//!
//! The dispatcher never talks to reqwest directly; it is handed a `Transport`
//! at construction. Production uses `HttpTransport`; dry runs and tests use
//! `RecordingTransport`, which never touches the network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use posco_common::error::{AppError, Result};

use crate::message::DoorayPayload;

/// Default per-attempt HTTP timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST the payload and return the HTTP status code.
    ///
    /// Network failures and timeouts are `AppError::DeliveryTransient`.
    async fn post(&self, endpoint: &str, payload: &DoorayPayload) -> Result<u16>;

    /// Human-readable name (e.g., "http").
    fn name(&self) -> &'static str;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, endpoint: &str, payload: &DoorayPayload) -> Result<u16> {
        let response = self
            .client
            .post(endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() { "timeout" } else { "request" };
                AppError::DeliveryTransient(format!("{} error: {}", kind, e))
            })?;
        Ok(response.status().as_u16())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// A single captured POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPost {
    pub endpoint: String,
    pub payload: DoorayPayload,
}

/// Scripted reply for `RecordingTransport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Status(u16),
    NetworkError(String),
}

/// In-memory transport: records every post and replays scripted replies.
///
/// Once the script is exhausted every post answers 200.
#[derive(Default)]
pub struct RecordingTransport {
    posts: Mutex<Vec<RecordedPost>>,
    script: Mutex<VecDeque<ScriptedReply>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue status codes for the next posts, in order.
    pub fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        let transport = Self::new();
        for status in statuses {
            transport.push_reply(ScriptedReply::Status(status));
        }
        transport
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }

    /// Answer `status` to the next `count` posts.
    pub fn always(status: u16, count: usize) -> Self {
        Self::with_statuses(std::iter::repeat_n(status, count))
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.posts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn post(&self, endpoint: &str, payload: &DoorayPayload) -> Result<u16> {
        self.posts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedPost {
                endpoint: endpoint.to_string(),
                payload: payload.clone(),
            });

        let reply = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match reply {
            Some(ScriptedReply::Status(status)) => Ok(status),
            Some(ScriptedReply::NetworkError(reason)) => Err(AppError::DeliveryTransient(reason)),
            None => Ok(200),
        }
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
