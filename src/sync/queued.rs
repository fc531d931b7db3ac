//! Postgres-backed [`SyncActions`]: every action becomes a `sync_requests` row.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::SyncActions;
use crate::db::Db;
use crate::error::Result;
use crate::model::envelope::{EpisodePayload, MoviePayload, SeriesPayload};
use crate::model::sync::{NewSyncRequest, RequestKind, Submitted};
use crate::model::Payload;

pub struct QueuedSync {
    db: Arc<Db>,
    movie_requests: bool,
}

impl QueuedSync {
    pub fn new(db: Arc<Db>) -> Self {
        Self {
            db,
            movie_requests: false,
        }
    }

    /// Queue a movie resync for movie events instead of only logging them.
    pub fn with_movie_requests(mut self) -> Self {
        self.movie_requests = true;
        self
    }

    async fn submit(&self, request: NewSyncRequest) -> Result<()> {
        let kind = request.kind;
        let key = request.dedup_key.clone();
        match self.db.submit_sync_request(request).await? {
            Submitted::Created(id) => debug!(%kind, %key, request = %id, "sync requested"),
            Submitted::Merged { canonical_id } => {
                debug!(%kind, %key, canonical = %canonical_id, "sync already pending")
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SyncActions for QueuedSync {
    async fn update_series(&self) -> Result<()> {
        self.submit(NewSyncRequest::bulk(RequestKind::Series)).await
    }

    async fn sync_episodes(&self) -> Result<()> {
        self.submit(NewSyncRequest::bulk(RequestKind::Episode)).await
    }

    async fn update_movies(&self) -> Result<()> {
        self.submit(NewSyncRequest::bulk(RequestKind::Movie)).await
    }

    async fn update_one_series(&self, payload: &Payload) -> Result<()> {
        let Some(event) = SeriesPayload::decode(payload) else {
            debug!("series event without a resource, ignoring");
            return Ok(());
        };
        self.submit(
            NewSyncRequest::entity(RequestKind::Series, event.series.id)
                .action(event.action)
                .payload(payload.to_value()),
        )
        .await
    }

    async fn sync_one_episode(&self, payload: &Payload) -> Result<()> {
        let Some(event) = EpisodePayload::decode(payload) else {
            debug!("episode event without a resource, ignoring");
            return Ok(());
        };
        self.submit(
            NewSyncRequest::entity(RequestKind::Episode, event.episode.id)
                .action(event.action)
                .payload(payload.to_value()),
        )
        .await
    }

    async fn movie_changed(&self, payload: &Payload) -> Result<()> {
        if !self.movie_requests {
            if let Some(first) = payload.first() {
                info!(event = %first, "movie event");
            }
            return Ok(());
        }
        let Some(event) = MoviePayload::decode(payload) else {
            debug!("movie event without a resource, ignoring");
            return Ok(());
        };
        self.submit(
            NewSyncRequest::entity(RequestKind::Movie, event.movie.id)
                .action(event.action)
                .payload(payload.to_value()),
        )
        .await
    }
}
