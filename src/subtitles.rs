//! Subtitle deletion with its audit trail.
//!
//! Deleting a subtitle file has three observable effects: the file goes
//! away, one history row is written and the subtitle index for the video is
//! refreshed. If the file cannot be removed the index is still refreshed,
//! but no history is written.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::audit::AuditLog;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::audit::{HistoryAction, MediaKind, MediaRef, NewHistory};
use crate::model::sync::{NewSyncRequest, RequestKind};
use crate::pathmap::PathMappings;

/// The only subtitle format that may be deleted.
pub const SUBTITLE_EXTENSION: &str = ".srt";

/// Refreshes what the host knows about the subtitles next to a video file.
#[async_trait]
pub trait SubtitleIndexer: Send + Sync {
    async fn store_subtitles(&self, server_path: &str, local_path: &str) -> Result<()>;

    async fn store_subtitles_movie(&self, server_path: &str, local_path: &str) -> Result<()>;
}

/// [`SubtitleIndexer`] that queues an index request for the host.
pub struct RequestIndexer {
    db: Arc<Db>,
}

impl RequestIndexer {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    async fn request(&self, kind: RequestKind, server_path: &str, local_path: &str) -> Result<()> {
        self.db
            .submit_sync_request(NewSyncRequest::path(kind, local_path).payload(
                serde_json::json!({
                    "server_path": server_path,
                    "local_path": local_path,
                }),
            ))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SubtitleIndexer for RequestIndexer {
    async fn store_subtitles(&self, server_path: &str, local_path: &str) -> Result<()> {
        self.request(RequestKind::IndexEpisode, server_path, local_path)
            .await
    }

    async fn store_subtitles_movie(&self, server_path: &str, local_path: &str) -> Result<()> {
        self.request(RequestKind::IndexMovie, server_path, local_path).await
    }
}

/// Subtitle language as the history row records it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleLanguage {
    /// ISO 639-1 code, e.g. `en`.
    pub code2: String,
    /// Display name, e.g. `English`.
    pub name: String,
    pub forced: bool,
}

impl SubtitleLanguage {
    pub fn new(code2: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code2: code2.into(),
            name: name.into(),
            forced: false,
        }
    }

    pub fn forced(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }

    /// `en` or `en:forced`.
    pub fn tag(&self) -> String {
        if self.forced {
            format!("{}:forced", self.code2)
        } else {
            self.code2.clone()
        }
    }

    /// `English` or `English forced`.
    pub fn label(&self) -> String {
        if self.forced {
            format!("{} forced", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// One subtitle file to delete. Both paths are local.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub media: MediaRef,
    pub language: SubtitleLanguage,
    /// The video the subtitles belong to.
    pub media_path: String,
    pub subtitles_path: String,
}

pub struct SubtitleRemover {
    audit: Arc<AuditLog>,
    indexer: Arc<dyn SubtitleIndexer>,
    paths: Arc<PathMappings>,
}

impl SubtitleRemover {
    pub fn new(
        audit: Arc<AuditLog>,
        indexer: Arc<dyn SubtitleIndexer>,
        paths: Arc<PathMappings>,
    ) -> Self {
        Self {
            audit,
            indexer,
            paths,
        }
    }

    /// Delete a subtitle file.
    ///
    /// - Not a `.srt`: `Err(Rejected)`, nothing touched.
    /// - File removal fails: index refreshed, `Ok(false)`.
    /// - Removed: history written, index refreshed, `Ok(true)`.
    /// - Removed but the history write fails: index refreshed, `Err`.
    pub async fn delete_subtitles(&self, request: &DeleteRequest) -> Result<bool> {
        if !request.subtitles_path.ends_with(SUBTITLE_EXTENSION) {
            error!(path = %request.subtitles_path, "refusing to delete a non-srt subtitle file");
            return Err(Error::Rejected(format!(
                "{} is not a {SUBTITLE_EXTENSION} file",
                request.subtitles_path
            )));
        }

        let kind = request.media.kind();
        let server_media_path = self.paths.path_replace_reverse(kind, &request.media_path);

        if let Err(e) = tokio::fs::remove_file(&request.subtitles_path).await {
            error!(path = %request.subtitles_path, error = %e, "unable to delete subtitles file");
            self.reindex(kind, &server_media_path, &request.media_path).await;
            return Ok(false);
        }

        let entry = NewHistory::new(
            request.media,
            HistoryAction::Deleted,
            format!("{} subtitles deleted from disk.", request.language.label()),
        )
        .video_path(server_media_path.clone())
        .language(request.language.tag())
        .subtitles_path(self.paths.path_replace_reverse(kind, &request.subtitles_path));
        let logged = self.audit.history_log(entry).await;

        self.reindex(kind, &server_media_path, &request.media_path).await;
        logged?;
        info!(path = %request.subtitles_path, "subtitles deleted");
        Ok(true)
    }

    /// Best effort. A failure here is logged and otherwise ignored.
    async fn reindex(&self, kind: MediaKind, server_path: &str, local_path: &str) {
        let result = match kind {
            MediaKind::Series => self.indexer.store_subtitles(server_path, local_path).await,
            MediaKind::Movie => {
                self.indexer
                    .store_subtitles_movie(server_path, local_path)
                    .await
            }
        };
        if let Err(e) = result {
            warn!(path = local_path, error = %e, "subtitle re-index failed");
        }
    }
}
