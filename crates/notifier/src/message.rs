//! Message model and the Dooray wire payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use posco_common::types::{BotCategory, Priority};

use crate::router::{EndpointKind, Route};
use crate::template::RenderedMessage;

/// Default resend budget per message.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One notification ready for delivery.
///
/// Everything except `retry_count` is fixed at construction.
#[derive(Debug, Clone)]
pub struct Message {
    id: MessageId,
    bot_category: BotCategory,
    priority: Priority,
    bot_name: String,
    title: String,
    body: String,
    color: String,
    content_hash: String,
    route: Route,
    routing_note: Option<String>,
    pub(crate) retry_count: u32,
    max_retries: u32,
    created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        rendered: RenderedMessage,
        priority: Priority,
        route: Route,
        max_retries: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        let content_hash = content_hash(rendered.bot_category, &rendered.title, &rendered.body);
        Self {
            id: MessageId::new(),
            bot_category: rendered.bot_category,
            priority,
            bot_name: rendered.bot_name,
            title: rendered.title,
            body: rendered.body,
            color: rendered.color,
            content_hash,
            route,
            routing_note: None,
            retry_count: 0,
            max_retries,
            created_at,
        }
    }

    /// Attach the router's fail-closed annotation. The note is appended to the
    /// body before hashing so it is part of the delivered content.
    pub(crate) fn with_routing_note(mut self, note: String) -> Self {
        self.body = format!("{}\n\n⚠️ {}", self.body, note);
        self.content_hash = content_hash(self.bot_category, &self.title, &self.body);
        self.routing_note = Some(note);
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn bot_category(&self) -> BotCategory {
        self.bot_category
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn endpoint(&self) -> &str {
        &self.route.url
    }

    pub fn endpoint_kind(&self) -> EndpointKind {
        self.route.kind
    }

    pub fn routing_note(&self) -> Option<&str> {
        self.routing_note.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether another attempt is allowed after a failed one.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Build the Dooray webhook body.
    pub fn to_payload(&self, bot_icon_url: &str) -> DoorayPayload {
        let text = self
            .body
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or(self.title.as_str())
            .to_string();
        DoorayPayload {
            bot_name: self.bot_name.clone(),
            bot_icon_image: bot_icon_url.to_string(),
            text,
            attachments: vec![Attachment {
                color: self.color.clone(),
                text: self.body.clone(),
            }],
        }
    }
}

/// Hex SHA-256 over category, title, and body.
pub fn content_hash(category: BotCategory, title: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(category.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(title.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoorayPayload {
    pub bot_name: String,
    pub bot_icon_image: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub color: String,
    pub text: String,
}
