//! Sync requests: durable asks for the host's sync engine, deduplicated while pending.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What the host is being asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Resync one series, or the whole catalog.
    Series,
    /// Resync one episode, or every episode.
    Episode,
    /// Resync one movie, or the whole catalog.
    Movie,
    /// Re-read on-disk subtitles for an episode file.
    IndexEpisode,
    /// Re-read on-disk subtitles for a movie file.
    IndexMovie,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Series => "series",
            RequestKind::Episode => "episode",
            RequestKind::Movie => "movie",
            RequestKind::IndexEpisode => "index_episode",
            RequestKind::IndexMovie => "index_movie",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "series" => Some(RequestKind::Series),
            "episode" => Some(RequestKind::Episode),
            "movie" => Some(RequestKind::Movie),
            "index_episode" => Some(RequestKind::IndexEpisode),
            "index_movie" => Some(RequestKind::IndexMovie),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Newtype for request IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Dedup key for bulk requests that cover the whole catalog.
pub const ALL: &str = "all";

/// Builder for a new sync request.
#[derive(Debug, Clone)]
pub struct NewSyncRequest {
    pub kind: RequestKind,
    /// Two pending requests with the same kind and key are the same request.
    pub dedup_key: String,
    pub entity_id: Option<i64>,
    pub action: Option<String>,
    pub payload: Value,
}

impl NewSyncRequest {
    /// A whole-catalog request.
    pub fn bulk(kind: RequestKind) -> Self {
        Self {
            kind,
            dedup_key: ALL.to_string(),
            entity_id: None,
            action: None,
            payload: Value::Null,
        }
    }

    /// A request about one catalog entity.
    pub fn entity(kind: RequestKind, entity_id: i64) -> Self {
        Self {
            kind,
            dedup_key: entity_id.to_string(),
            entity_id: Some(entity_id),
            action: None,
            payload: Value::Null,
        }
    }

    /// A request keyed on a file path.
    pub fn path(kind: RequestKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            dedup_key: path.into(),
            entity_id: None,
            action: None,
            payload: Value::Null,
        }
    }

    pub fn action(mut self, action: Option<String>) -> Self {
        self.action = action;
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Lifecycle of a stored request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Done,
}

impl RequestState {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Done => "done",
        }
    }
}

/// A stored request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub dedup_key: String,
    pub entity_id: Option<i64>,
    pub action: Option<String>,
    pub payload: Value,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
}

/// Result of submitting a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Created(RequestId),
    /// An equivalent request was already pending.
    Merged { canonical_id: RequestId },
}
