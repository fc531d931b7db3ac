//! Scheduler jobs: bulk resyncs queued when a connection comes up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of bulk work. Jobs of the same kind are interchangeable,
/// so the kind doubles as the dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Re-read the whole series catalog.
    FullSeriesSync,
    /// Re-read every episode of every series.
    FullEpisodeSync,
    /// Re-read the whole movie catalog.
    FullMovieSync,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobKind::FullSeriesSync => "full_series_sync",
            JobKind::FullEpisodeSync => "full_episode_sync",
            JobKind::FullMovieSync => "full_movie_sync",
        };
        write!(f, "{s}")
    }
}

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A queued job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// What asked for it (e.g. "series-hub/connected").
    pub source: String,
    pub enqueued_at: DateTime<Utc>,
}

/// What happened when a job was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// New job queued.
    Created(JobId),
    /// An equivalent job was already pending; nothing was added.
    Merged { canonical_id: JobId },
    /// The worker has stopped; the job was discarded.
    Dropped,
}

impl EnqueueResult {
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}
