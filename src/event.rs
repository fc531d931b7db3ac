//! Event stream: tells observers that persisted audit state changed.
//!
//! Publish-only and fire-and-forget. Every audit write publishes exactly one
//! event tagged with its scope; observers re-read whatever view the scope
//! names. Slow receivers lag and lose events rather than block writers.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::audit::AuditScope;

/// A change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event was published.
    pub timestamp: DateTime<Utc>,
    /// Which view changed.
    #[serde(rename = "type")]
    pub scope: AuditScope,
}

/// Broadcast hub for [`Event`]s.
#[derive(Debug)]
pub struct EventStream {
    tx: broadcast::Sender<Event>,
    seq: AtomicU64,
}

impl EventStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    /// Publish a scope change. Never fails; no subscribers is fine.
    pub fn publish(&self, scope: AuditScope) -> Event {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Utc::now(),
            scope,
        };
        let receivers = self.tx.send(event.clone()).unwrap_or(0);
        tracing::debug!(scope = %scope, seq = event.seq, receivers, "event published");
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let stream = EventStream::new(8);
        let mut rx1 = stream.subscribe();
        let mut rx2 = stream.subscribe();

        stream.publish(AuditScope::MovieBlacklist);

        assert_eq!(rx1.recv().await.unwrap().scope, AuditScope::MovieBlacklist);
        assert_eq!(rx2.recv().await.unwrap().scope, AuditScope::MovieBlacklist);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let stream = EventStream::new(8);
        let first = stream.publish(AuditScope::EpisodeHistory);
        let second = stream.publish(AuditScope::EpisodeHistory);
        assert_eq!(first.seq + 1, second.seq);
    }

    #[test]
    fn event_serializes_scope_as_type() {
        let stream = EventStream::new(8);
        let event = stream.publish(AuditScope::EpisodeBlacklist);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"episodeBlacklist""#));
    }
}
