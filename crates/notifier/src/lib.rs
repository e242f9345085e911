//! Dooray webhook delivery for the POSCO news monitors.
//!
//! Notifications are rendered from typed templates, routed to the news or
//! operations webhook, deduplicated by content hash, and delivered in
//! priority order by a single background worker with bounded retries.

pub mod dedup;
pub mod dispatcher;
pub mod layout;
pub mod message;
pub mod queue;
pub mod retry;
pub mod router;
pub mod stats;
pub mod template;
pub mod transport;

pub use dispatcher::{EnqueueOutcome, RawNotification, WebhookDispatcher};
pub use message::{DoorayPayload, Message, MessageId};
pub use template::Notification;
pub use transport::{HttpTransport, RecordingTransport, Transport};
