use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::platform::InboundReactionEvent;

/// Identity of an inbound event for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub event_ts: String,
    pub channel_id: String,
    pub message_ts: String,
}

impl From<&InboundReactionEvent> for EventKey {
    fn from(event: &InboundReactionEvent) -> Self {
        Self {
            event_ts: event.event_ts.clone(),
            channel_id: event.channel_id.clone(),
            message_ts: event.message_ts.clone(),
        }
    }
}

/// In-memory, process-local record of recently accepted events.
///
/// Upstream delivery is at-least-once, so the same event can arrive more than
/// once within a short window. Only the first arrival inside `ttl` is accepted.
pub struct Deduplicator {
    ttl: Duration,
    seen: Mutex<HashMap<EventKey, Instant>>,
}

impl Deduplicator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` the first time `key` is seen within the TTL window and
    /// records it; returns `false` for a repeat inside the window.
    ///
    /// Check and record happen under one lock, so two concurrent identical
    /// events cannot both pass.
    pub async fn should_process(&self, key: &EventKey, now: Instant) -> bool {
        let mut seen = self.seen.lock().await;

        if let Some(last_seen) = seen.get(key) {
            if now.saturating_duration_since(*last_seen) < self.ttl {
                debug!("Duplicate event suppressed: {:?}", key);
                return false;
            }
        }

        seen.insert(key.clone(), now);

        let ttl = self.ttl;
        seen.retain(|_, last_seen| now.saturating_duration_since(*last_seen) <= ttl);
        true
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.seen.lock().await.len()
    }
}
