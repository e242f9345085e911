//! Dedup cache: suppresses identical content fired in quick succession.
//!
//! After a content hash is allowed through, identical content is suppressed
//! until the window elapses. State is process-local: a restart resets every
//! window, which at worst repeats one notification.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default suppression window (1 hour).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Default number of tracked hashes.
pub const DEFAULT_CAPACITY: usize = 1000;

pub struct DedupCache {
    window: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if this hash was allowed within the window.
    /// Otherwise records it as sent now and returns `false`.
    pub fn should_suppress(&self, content_hash: &str) -> bool {
        self.check_at(content_hash, Instant::now())
    }

    /// Same as `should_suppress`, evaluated at `now`.
    pub fn check_at(&self, content_hash: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(sent_at) = entries.get(content_hash)
            && now.saturating_duration_since(*sent_at) < self.window
        {
            tracing::debug!(
                content_hash,
                window_secs = self.window.as_secs(),
                "Message suppressed, identical content inside dedup window"
            );
            return true;
        }

        if !entries.contains_key(content_hash) && entries.len() >= self.capacity {
            let window = self.window;
            entries.retain(|_, sent_at| now.saturating_duration_since(*sent_at) < window);

            if entries.len() >= self.capacity
                && let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, sent_at)| **sent_at)
                    .map(|(hash, _)| hash.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(content_hash.to_string(), now);
        false
    }

    /// Forget a hash so the next identical message is sent.
    pub fn forget(&self, content_hash: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(content_hash);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_CAPACITY)
    }
}
