//! Hub adapters: one per server protocol, both feeding [`EventEnvelope`]s
//! into a per-server channel drained by the [`dispatch::Dispatcher`].
//!
//! - [`legacy`]: callback-channel hub (negotiate / connect / start), single attempt.
//! - [`modern`]: JSON record hub with handshake, keep-alive and interval reconnect.
//!
//! [`EventEnvelope`]: crate::model::EventEnvelope

pub mod dispatch;
pub mod legacy;
pub mod modern;
pub mod transport;

use opentelemetry::KeyValue;
use tokio::sync::watch;
use tracing::{Span, warn};

use crate::error::{Error, Result};
use crate::model::ConnectionState;
use crate::telemetry::hub::{record_connection_transition, start_session_span};
use crate::telemetry::metrics;

/// Outcome of one connection attempt, as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectResult {
    Connected,
    /// Server unreachable or refused the handshake. Not an error for the host.
    Failed { reason: String },
}

impl ConnectResult {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectResult::Connected)
    }
}

/// Tracks and publishes one adapter's [`ConnectionState`].
///
/// Every change is validated against the state machine, recorded on the
/// adapter's session span and counted.
pub(crate) struct Lifecycle {
    server: &'static str,
    tx: watch::Sender<ConnectionState>,
    span: Span,
}

impl Lifecycle {
    pub(crate) fn new(server: &'static str) -> Self {
        let (tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            server,
            tx,
            span: start_session_span(server),
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    /// Move to `to`. A disallowed move leaves the state untouched.
    pub(crate) fn transition(&self, to: ConnectionState) -> Result<()> {
        let from = self.current();
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            warn!(server = self.server, %from, %to, "refusing connection transition");
            return Err(Error::InvalidTransition { from, to });
        }
        self.tx.send_replace(to);
        record_connection_transition(&self.span, &from.to_string(), &to.to_string());
        metrics::connection_transitions().add(
            1,
            &[
                KeyValue::new("server", self.server),
                KeyValue::new("to", to.to_string()),
            ],
        );
        Ok(())
    }

    /// Like [`transition`](Self::transition) for callers that hold no error path.
    pub(crate) fn advance(&self, to: ConnectionState) {
        let _ = self.transition(to);
    }
}

/// Resolves once `shutdown` reads true, or its sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
