//! Audit log: write a history/blacklist row, then tell observers.
//!
//! [`AuditStore`] is the persistence seam (Postgres in production, see
//! `db::audit`). [`AuditLog`] wraps it and publishes exactly one
//! [`EventStream`] event per successful write. A failed write publishes
//! nothing and returns the error.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tracing::{debug, warn};

use crate::error::Result;
use crate::event::EventStream;
use crate::model::audit::*;
use crate::telemetry::metrics;

/// Row-level access to the four audit tables.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert a history row. Returns its id.
    async fn insert_history(&self, entry: &NewHistory) -> Result<i64>;

    async fn insert_blacklist(&self, entry: &NewBlacklist) -> Result<()>;

    /// Remove blacklist rows for one provider result. Returns rows removed.
    async fn delete_blacklist(&self, kind: MediaKind, provider: &str, subs_id: &str) -> Result<u64>;

    async fn delete_all_blacklist(&self, kind: MediaKind) -> Result<u64>;

    /// Newest first.
    async fn blacklist(&self, kind: MediaKind) -> Result<Vec<BlacklistEntry>>;

    /// Newest first, at most `limit` rows.
    async fn recent_history(&self, kind: MediaKind, limit: i64) -> Result<Vec<HistoryEntry>>;
}

pub struct AuditLog {
    store: Arc<dyn AuditStore>,
    events: Arc<EventStream>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn AuditStore>, events: Arc<EventStream>) -> Self {
        Self { store, events }
    }

    pub fn events(&self) -> &Arc<EventStream> {
        &self.events
    }

    /// Append a history row for an episode or a movie.
    pub async fn history_log(&self, entry: NewHistory) -> Result<i64> {
        let scope = AuditScope::history(entry.media().kind());
        let id = self.write(scope, self.store.insert_history(&entry)).await?;
        debug!(%scope, id, action = ?entry.action(), "history recorded");
        Ok(id)
    }

    /// Append a blacklist row for an episode or a movie.
    pub async fn blacklist_log(&self, entry: NewBlacklist) -> Result<()> {
        let scope = AuditScope::blacklist(entry.media.kind());
        self.write(scope, self.store.insert_blacklist(&entry)).await?;
        debug!(%scope, provider = %entry.provider, subs_id = %entry.subs_id, "blacklisted");
        Ok(())
    }

    pub async fn blacklist_delete(&self, kind: MediaKind, provider: &str, subs_id: &str) -> Result<u64> {
        let scope = AuditScope::blacklist(kind);
        self.write(scope, self.store.delete_blacklist(kind, provider, subs_id))
            .await
    }

    pub async fn blacklist_delete_all(&self, kind: MediaKind) -> Result<u64> {
        let scope = AuditScope::blacklist(kind);
        self.write(scope, self.store.delete_all_blacklist(kind)).await
    }

    /// `(provider, subs_id)` pairs the user never wants offered again.
    pub async fn get_blacklist(&self, kind: MediaKind) -> Result<Vec<(String, String)>> {
        Ok(self
            .store
            .blacklist(kind)
            .await?
            .into_iter()
            .map(|entry| (entry.provider, entry.subs_id))
            .collect())
    }

    pub async fn blacklist_entries(&self, kind: MediaKind) -> Result<Vec<BlacklistEntry>> {
        self.store.blacklist(kind).await
    }

    pub async fn recent_history(&self, kind: MediaKind, limit: i64) -> Result<Vec<HistoryEntry>> {
        self.store.recent_history(kind, limit).await
    }

    /// Await a write, count it, and publish `scope` only if it succeeded.
    async fn write<T>(
        &self,
        scope: AuditScope,
        op: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match op.await {
            Ok(value) => {
                metrics::audit_writes().add(
                    1,
                    &[
                        KeyValue::new("table", scope.as_str()),
                        KeyValue::new("result", "ok"),
                    ],
                );
                self.events.publish(scope);
                Ok(value)
            }
            Err(e) => {
                metrics::audit_writes().add(
                    1,
                    &[
                        KeyValue::new("table", scope.as_str()),
                        KeyValue::new("result", "error"),
                    ],
                );
                warn!(%scope, error = %e, "audit write failed");
                Err(e)
            }
        }
    }
}
