use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, Result};

/// Notifier configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Dooray webhook for news notifications
    pub news_webhook_url: String,

    /// Dooray webhook for operations / error notifications
    pub ops_webhook_url: String,

    /// Bot avatar URL (empty string for the Dooray default)
    pub bot_icon_url: String,

    /// Resend budget per message (default: 3)
    pub max_retries: u32,

    /// First backoff delay in milliseconds (default: 1000)
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling in milliseconds (default: 30000)
    pub retry_max_delay_ms: u64,

    /// Per-attempt HTTP timeout in seconds (default: 10)
    pub http_timeout_secs: u64,

    /// Identical content is suppressed for this long (default: 3600)
    pub dedup_window_secs: u64,

    /// Maximum tracked content hashes (default: 1000)
    pub dedup_capacity: usize,

    /// Maximum queued messages (default: 1000)
    pub queue_capacity: usize,
}

impl NotifierConfig {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppError::Config(format!("{} environment variable is required", key)))
        };

        Ok(Self {
            news_webhook_url: required("DOORAY_NEWS_WEBHOOK_URL")?,
            ops_webhook_url: required("DOORAY_OPS_WEBHOOK_URL")?,
            bot_icon_url: lookup("DOORAY_BOT_ICON_URL").unwrap_or_default(),
            max_retries: parse_or(&lookup, "NOTIFIER_MAX_RETRIES", 3)?,
            retry_base_delay_ms: parse_or(&lookup, "NOTIFIER_RETRY_BASE_DELAY_MS", 1000)?,
            retry_max_delay_ms: parse_or(&lookup, "NOTIFIER_RETRY_MAX_DELAY_MS", 30_000)?,
            http_timeout_secs: parse_or(&lookup, "NOTIFIER_HTTP_TIMEOUT_SECS", 10)?,
            dedup_window_secs: parse_or(&lookup, "NOTIFIER_DEDUP_WINDOW_SECS", 3600)?,
            dedup_capacity: parse_or(&lookup, "NOTIFIER_DEDUP_CAPACITY", 1000)?,
            queue_capacity: parse_or(&lookup, "NOTIFIER_QUEUE_CAPACITY", 1000)?,
        })
    }

    /// Defaults with the two webhook URLs filled in.
    pub fn with_endpoints(news_webhook_url: impl Into<String>, ops_webhook_url: impl Into<String>) -> Self {
        Self {
            news_webhook_url: news_webhook_url.into(),
            ops_webhook_url: ops_webhook_url.into(),
            bot_icon_url: String::new(),
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            http_timeout_secs: 10,
            dedup_window_secs: 3600,
            dedup_capacity: 1000,
            queue_capacity: 1000,
        }
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a valid number, got {:?}", key, raw))),
        None => Ok(default),
    }
}
