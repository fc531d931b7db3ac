//! Sync request queue: submit with dedup, read pending, mark done.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::sync::*;

impl super::Db {
    /// Record a request. A pending request with the same kind and dedup key
    /// absorbs it.
    pub async fn submit_sync_request(&self, new: NewSyncRequest) -> Result<Submitted> {
        let mut tx = self.pool.begin().await?;
        let id = Uuid::new_v4();

        // The partial unique index on (kind, dedup_key) only covers pending rows.
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO sync_requests (id, kind, dedup_key, entity_id, action, payload, state, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7)
             ON CONFLICT (kind, dedup_key) WHERE state = 'pending'
             DO NOTHING
             RETURNING id",
        )
        .bind(id)
        .bind(new.kind.as_str())
        .bind(&new.dedup_key)
        .bind(new.entity_id)
        .bind(&new.action)
        .bind(&new.payload)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await?;

        let result = match inserted {
            Some((id,)) => Submitted::Created(RequestId(id)),
            None => {
                let canonical: (Uuid,) = sqlx::query_as(
                    "SELECT id FROM sync_requests
                     WHERE kind = $1 AND dedup_key = $2 AND state = 'pending'
                     LIMIT 1",
                )
                .bind(new.kind.as_str())
                .bind(&new.dedup_key)
                .fetch_one(&mut *tx)
                .await?;
                Submitted::Merged {
                    canonical_id: RequestId(canonical.0),
                }
            }
        };

        tx.commit().await?;
        Ok(result)
    }

    /// Oldest pending requests first.
    pub async fn pending_sync_requests(&self, limit: i64) -> Result<Vec<SyncRequest>> {
        let rows: Vec<SyncRequestRow> = sqlx::query_as(
            "SELECT id, kind, dedup_key, entity_id, action, payload, state, created_at
             FROM sync_requests WHERE state = 'pending'
             ORDER BY created_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SyncRequestRow::try_into_request).collect()
    }

    /// Mark a request handled. Returns false if it was not pending.
    pub async fn complete_sync_request(&self, id: RequestId) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE sync_requests SET state = 'done', done_at = now()
             WHERE id = $1 AND state = 'pending'",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(done == 1)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct SyncRequestRow {
    id: Uuid,
    kind: String,
    dedup_key: String,
    entity_id: Option<i64>,
    action: Option<String>,
    payload: serde_json::Value,
    state: String,
    created_at: DateTime<Utc>,
}

impl SyncRequestRow {
    fn try_into_request(self) -> Result<SyncRequest> {
        let kind = RequestKind::parse(&self.kind)
            .ok_or_else(|| Error::Other(format!("unknown sync request kind: {}", self.kind)))?;
        let state = match self.state.as_str() {
            "pending" => RequestState::Pending,
            "done" => RequestState::Done,
            other => return Err(Error::Other(format!("unknown sync request state: {other}"))),
        };
        Ok(SyncRequest {
            id: RequestId(self.id),
            kind,
            dedup_key: self.dedup_key,
            entity_id: self.entity_id,
            action: self.action,
            payload: self.payload,
            state,
            created_at: self.created_at,
        })
    }
}
