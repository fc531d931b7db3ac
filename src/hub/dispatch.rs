//! Topic dispatcher: classifies envelopes and calls into [`SyncActions`].
//!
//! Routing is a pure function of the topic. The dispatcher holds nothing
//! but a handle to the sync actions, so both adapters can share one.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, warn};

use crate::error::Result;
use crate::model::{EventEnvelope, Topic};
use crate::sync::SyncActions;
use crate::telemetry::hub::{record_route, start_dispatch_span};
use crate::telemetry::metrics;

/// Where an envelope goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Informational or unrecognized topic. Not an error.
    Ignore,
    /// Single-series resync.
    Series,
    /// Single-episode resync.
    Episode,
    /// Movie notification path.
    Movie,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::Ignore => "ignored",
            Route::Series => "series",
            Route::Episode => "episode",
            Route::Movie => "movie",
        }
    }
}

/// The routing table.
pub fn route(topic: &Topic) -> Route {
    match topic {
        Topic::Series => Route::Series,
        Topic::Episode => Route::Episode,
        Topic::Movie => Route::Movie,
        Topic::Version
        | Topic::Queue
        | Topic::QueueDetails
        | Topic::Health
        | Topic::Command
        | Topic::Unknown(_) => Route::Ignore,
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    actions: Arc<dyn SyncActions>,
}

impl Dispatcher {
    pub fn new(actions: Arc<dyn SyncActions>) -> Self {
        Self { actions }
    }

    /// Route one envelope and run its sync action. The payload is passed
    /// through untouched.
    pub async fn dispatch(&self, envelope: &EventEnvelope) -> Result<Route> {
        let route = route(&envelope.topic);
        metrics::events_dispatched().add(
            1,
            &[
                KeyValue::new("topic", envelope.topic.to_string()),
                KeyValue::new("route", route.as_str()),
            ],
        );
        match route {
            Route::Ignore if envelope.topic.is_informational() => {
                debug!(topic = %envelope.topic, "ignoring informational event");
            }
            Route::Ignore => {
                debug!(topic = %envelope.topic, "ignoring unrecognized topic");
            }
            Route::Series => self.actions.update_one_series(&envelope.payload).await?,
            Route::Episode => self.actions.sync_one_episode(&envelope.payload).await?,
            Route::Movie => self.actions.movie_changed(&envelope.payload).await?,
        }
        Ok(route)
    }

    /// Dispatch everything `server`'s adapter sends, in arrival order, until
    /// the adapter drops its sender. Sync failures are logged and skipped.
    pub async fn drain(&self, server: &str, mut events: mpsc::Receiver<EventEnvelope>) {
        while let Some(envelope) = events.recv().await {
            let span = start_dispatch_span(server, envelope.topic.as_str());
            let result = self.dispatch(&envelope).instrument(span.clone()).await;
            match result {
                Ok(route) => record_route(&span, route.as_str()),
                Err(e) => {
                    span.in_scope(|| warn!(server, topic = %envelope.topic, error = %e, "sync action failed"));
                }
            }
        }
        debug!(server, "event channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn informational_topics_are_ignored() {
        for name in ["version", "queue", "queue/details", "queue-details", "health", "command"] {
            assert_eq!(route(&Topic::parse(name)), Route::Ignore, "{name}");
        }
    }

    #[test]
    fn catalog_topics_route() {
        assert_eq!(route(&Topic::Series), Route::Series);
        assert_eq!(route(&Topic::Episode), Route::Episode);
        assert_eq!(route(&Topic::Movie), Route::Movie);
    }

    #[test]
    fn unknown_topic_is_ignored() {
        assert_eq!(route(&Topic::parse("calendar")), Route::Ignore);
        assert_eq!(route(&Topic::parse("")), Route::Ignore);
    }
}
