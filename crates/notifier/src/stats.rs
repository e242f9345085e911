//! Delivery statistics and terminal delivery records.

use chrono::{DateTime, Utc};
use serde::Serialize;

use posco_common::types::DeliveryStatus;

use crate::message::Message;

/// Snapshot returned by `WebhookDispatcher::stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatcherStats {
    pub enqueued: u64,
    pub suppressed: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Pending messages discarded at shutdown
    pub dropped: u64,
    /// Every HTTP attempt, first sends and resends alike
    pub attempts: u64,
    pub retries: u64,
    pub queue_len: usize,
    pub in_flight: bool,
    /// Percentage of finished messages that were delivered (0 when none finished)
    pub success_rate: f64,
    pub last_delivery_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub enqueued: u64,
    pub suppressed: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
    pub attempts: u64,
    pub retries: u64,
    pub last_delivery_at: Option<DateTime<Utc>>,
}

impl Counters {
    pub fn snapshot(&self, queue_len: usize, in_flight: bool) -> DispatcherStats {
        let finished = self.delivered + self.failed;
        let success_rate = if finished == 0 {
            0.0
        } else {
            self.delivered as f64 / finished as f64 * 100.0
        };
        DispatcherStats {
            enqueued: self.enqueued,
            suppressed: self.suppressed,
            delivered: self.delivered,
            failed: self.failed,
            dropped: self.dropped,
            attempts: self.attempts,
            retries: self.retries,
            queue_len,
            in_flight,
            success_rate,
            last_delivery_at: self.last_delivery_at,
        }
    }
}

/// A message that reached `Delivered` or `Failed`.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub message: Message,
    pub status: DeliveryStatus,
    /// HTTP attempts made for this delivery
    pub attempts: u32,
    pub last_error: Option<String>,
    pub finished_at: DateTime<Utc>,
}
