//! Sync actions: what the bridge asks of the host's catalog sync engine.
//!
//! The dispatcher and the scheduler only ever talk to [`SyncActions`].
//! [`QueuedSync`] is the stock implementation: it records each request in
//! Postgres for the host to pick up.

mod queued;

pub use queued::QueuedSync;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::model::Payload;

#[async_trait]
pub trait SyncActions: Send + Sync {
    /// Re-read the whole series catalog.
    async fn update_series(&self) -> Result<()>;

    /// Re-read every episode.
    async fn sync_episodes(&self) -> Result<()>;

    /// Re-read the whole movie catalog.
    async fn update_movies(&self) -> Result<()>;

    /// One series changed. `payload` is the event body as received.
    async fn update_one_series(&self, payload: &Payload) -> Result<()>;

    /// One episode changed. `payload` is the event body as received.
    async fn sync_one_episode(&self, payload: &Payload) -> Result<()>;

    /// A movie event arrived. Only logs the first element unless overridden.
    async fn movie_changed(&self, payload: &Payload) -> Result<()> {
        match payload.first() {
            Some(first) => info!(event = %first, "movie event"),
            None => info!("movie event without body"),
        }
        Ok(())
    }
}
