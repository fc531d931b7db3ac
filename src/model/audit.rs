//! Audit records: subtitle history and provider blacklist rows.
//!
//! Rows are append-only. The only removal path is an explicit blacklist delete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Which catalog a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Series,
    Movie,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Series => write!(f, "series"),
            MediaKind::Movie => write!(f, "movie"),
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "series" | "episode" => Ok(MediaKind::Series),
            "movie" => Ok(MediaKind::Movie),
            other => Err(format!("unknown media kind: {other}")),
        }
    }
}

/// The entity an audit row is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaRef {
    Episode { series_id: i64, episode_id: i64 },
    Movie { movie_id: i64 },
}

impl MediaRef {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaRef::Episode { .. } => MediaKind::Series,
            MediaRef::Movie { .. } => MediaKind::Movie,
        }
    }
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// Event-stream tag published after every audit write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditScope {
    EpisodeHistory,
    MovieHistory,
    EpisodeBlacklist,
    MovieBlacklist,
}

impl AuditScope {
    pub fn history(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Series => AuditScope::EpisodeHistory,
            MediaKind::Movie => AuditScope::MovieHistory,
        }
    }

    pub fn blacklist(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Series => AuditScope::EpisodeBlacklist,
            MediaKind::Movie => AuditScope::MovieBlacklist,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuditScope::EpisodeHistory => "episodeHistory",
            AuditScope::MovieHistory => "movieHistory",
            AuditScope::EpisodeBlacklist => "episodeBlacklist",
            AuditScope::MovieBlacklist => "movieBlacklist",
        }
    }
}

impl std::fmt::Display for AuditScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// What happened to a subtitle. Stored as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Deleted,
    Downloaded,
    Manual,
    Upgraded,
    Uploaded,
    Synced,
}

impl HistoryAction {
    pub fn code(self) -> i32 {
        match self {
            HistoryAction::Deleted => 0,
            HistoryAction::Downloaded => 1,
            HistoryAction::Manual => 2,
            HistoryAction::Upgraded => 3,
            HistoryAction::Uploaded => 4,
            HistoryAction::Synced => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(HistoryAction::Deleted),
            1 => Some(HistoryAction::Downloaded),
            2 => Some(HistoryAction::Manual),
            3 => Some(HistoryAction::Upgraded),
            4 => Some(HistoryAction::Uploaded),
            5 => Some(HistoryAction::Synced),
            _ => None,
        }
    }
}

/// A stored history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub media: MediaRef,
    pub action: i32,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub video_path: Option<String>,
    pub language: Option<String>,
    pub provider: Option<String>,
    pub score: Option<i32>,
    pub subs_id: Option<String>,
    pub subtitles_path: Option<String>,
}

/// Builder for a new history row. The timestamp is taken at write time.
#[derive(Debug, Clone)]
pub struct NewHistory {
    pub(crate) media: MediaRef,
    pub(crate) action: HistoryAction,
    pub(crate) description: String,
    pub(crate) video_path: Option<String>,
    pub(crate) language: Option<String>,
    pub(crate) provider: Option<String>,
    pub(crate) score: Option<i32>,
    pub(crate) subs_id: Option<String>,
    pub(crate) subtitles_path: Option<String>,
}

impl NewHistory {
    pub fn new(media: MediaRef, action: HistoryAction, description: impl Into<String>) -> Self {
        Self {
            media,
            action,
            description: description.into(),
            video_path: None,
            language: None,
            provider: None,
            score: None,
            subs_id: None,
            subtitles_path: None,
        }
    }

    pub fn video_path(mut self, path: impl Into<String>) -> Self {
        self.video_path = Some(path.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn score(mut self, score: i32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn subs_id(mut self, subs_id: impl Into<String>) -> Self {
        self.subs_id = Some(subs_id.into());
        self
    }

    pub fn subtitles_path(mut self, path: impl Into<String>) -> Self {
        self.subtitles_path = Some(path.into());
        self
    }

    pub fn media(&self) -> MediaRef {
        self.media
    }

    pub fn action(&self) -> HistoryAction {
        self.action
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn language_tag(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn video(&self) -> Option<&str> {
        self.video_path.as_deref()
    }

    pub fn subtitles(&self) -> Option<&str> {
        self.subtitles_path.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Blacklist
// ---------------------------------------------------------------------------

/// A provider result the user never wants offered again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlacklist {
    pub media: MediaRef,
    pub provider: String,
    pub subs_id: String,
    pub language: String,
}

/// A stored blacklist row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub media: MediaRef,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub subs_id: String,
    pub language: Option<String>,
}
