//! Connection lifecycle of a hub adapter.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one adapter's server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Constructed, nothing attempted yet.
    Idle,
    /// Negotiating and opening the socket.
    Connecting,
    /// Handshake done, messages flowing.
    Live,
    /// Lost the connection, waiting out the reconnect interval.
    Retrying,
    /// Given up or shut down. Terminal for this attempt.
    Closed,
}

impl ConnectionState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Idle, Connecting)
                | (Connecting, Live)
                | (Connecting, Retrying)  // open failed, policy allows another try
                | (Connecting, Closed)    // open failed, no retry
                | (Live, Retrying)
                | (Live, Closed)
                | (Retrying, Connecting)
                | (Retrying, Closed)
                | (Closed, Connecting) // host restarted the adapter
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Live => "live",
            ConnectionState::Retrying => "retrying",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}
