//! Audit tables: series/movie history and blacklist.
//!
//! Series rows are keyed on `(series_id, episode_id)`, movie rows on
//! `movie_id`. Every insert takes its timestamp at write time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::audit::AuditStore;
use crate::error::Result;
use crate::model::audit::*;

fn history_table(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Series => "series_history",
        MediaKind::Movie => "movie_history",
    }
}

fn blacklist_table(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Series => "series_blacklist",
        MediaKind::Movie => "movie_blacklist",
    }
}

#[async_trait]
impl AuditStore for super::Db {
    async fn insert_history(&self, entry: &NewHistory) -> Result<i64> {
        let now = Utc::now();
        let (id,): (i64,) = match entry.media {
            MediaRef::Episode {
                series_id,
                episode_id,
            } => {
                sqlx::query_as(
                    "INSERT INTO series_history (action, series_id, episode_id, timestamp, description, video_path, language, provider, score, subs_id, subtitles_path)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                     RETURNING id",
                )
                .bind(entry.action.code())
                .bind(series_id)
                .bind(episode_id)
                .bind(now)
                .bind(&entry.description)
                .bind(&entry.video_path)
                .bind(&entry.language)
                .bind(&entry.provider)
                .bind(entry.score)
                .bind(&entry.subs_id)
                .bind(&entry.subtitles_path)
                .fetch_one(&self.pool)
                .await?
            }
            MediaRef::Movie { movie_id } => {
                sqlx::query_as(
                    "INSERT INTO movie_history (action, movie_id, timestamp, description, video_path, language, provider, score, subs_id, subtitles_path)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                     RETURNING id",
                )
                .bind(entry.action.code())
                .bind(movie_id)
                .bind(now)
                .bind(&entry.description)
                .bind(&entry.video_path)
                .bind(&entry.language)
                .bind(&entry.provider)
                .bind(entry.score)
                .bind(&entry.subs_id)
                .bind(&entry.subtitles_path)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(id)
    }

    async fn insert_blacklist(&self, entry: &NewBlacklist) -> Result<()> {
        let now = Utc::now();
        match entry.media {
            MediaRef::Episode {
                series_id,
                episode_id,
            } => {
                sqlx::query(
                    "INSERT INTO series_blacklist (series_id, episode_id, timestamp, provider, subs_id, language)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(series_id)
                .bind(episode_id)
                .bind(now)
                .bind(&entry.provider)
                .bind(&entry.subs_id)
                .bind(&entry.language)
                .execute(&self.pool)
                .await?;
            }
            MediaRef::Movie { movie_id } => {
                sqlx::query(
                    "INSERT INTO movie_blacklist (movie_id, timestamp, provider, subs_id, language)
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(movie_id)
                .bind(now)
                .bind(&entry.provider)
                .bind(&entry.subs_id)
                .bind(&entry.language)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn delete_blacklist(&self, kind: MediaKind, provider: &str, subs_id: &str) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE provider = $1 AND subs_id = $2",
            blacklist_table(kind)
        );
        let deleted = sqlx::query(&sql)
            .bind(provider)
            .bind(subs_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }

    async fn delete_all_blacklist(&self, kind: MediaKind) -> Result<u64> {
        let sql = format!("DELETE FROM {}", blacklist_table(kind));
        let deleted = sqlx::query(&sql).execute(&self.pool).await?.rows_affected();
        Ok(deleted)
    }

    async fn blacklist(&self, kind: MediaKind) -> Result<Vec<BlacklistEntry>> {
        let entries = match kind {
            MediaKind::Series => sqlx::query_as::<_, BlacklistRow>(
                "SELECT series_id, episode_id, NULL::BIGINT AS movie_id, timestamp, provider, subs_id, language
                 FROM series_blacklist ORDER BY timestamp DESC",
            ),
            MediaKind::Movie => sqlx::query_as::<_, BlacklistRow>(
                "SELECT NULL::BIGINT AS series_id, NULL::BIGINT AS episode_id, movie_id, timestamp, provider, subs_id, language
                 FROM movie_blacklist ORDER BY timestamp DESC",
            ),
        }
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(BlacklistRow::into_entry)
        .collect();
        Ok(entries)
    }

    async fn recent_history(&self, kind: MediaKind, limit: i64) -> Result<Vec<HistoryEntry>> {
        let ids = match kind {
            MediaKind::Series => "series_id, episode_id, NULL::BIGINT AS movie_id",
            MediaKind::Movie => "NULL::BIGINT AS series_id, NULL::BIGINT AS episode_id, movie_id",
        };
        let sql = format!(
            "SELECT id, action, {ids}, timestamp, description, video_path, language, provider, score, subs_id, subtitles_path
             FROM {} ORDER BY timestamp DESC, id DESC LIMIT $1",
            history_table(kind)
        );
        let entries = sqlx::query_as::<_, HistoryRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(HistoryRow::into_entry)
            .collect();
        Ok(entries)
    }
}

/// Series and movie rows share one shape; the unused ids come back NULL.
fn media_ref(series_id: Option<i64>, episode_id: Option<i64>, movie_id: Option<i64>) -> MediaRef {
    match movie_id {
        Some(movie_id) => MediaRef::Movie { movie_id },
        None => MediaRef::Episode {
            series_id: series_id.unwrap_or_default(),
            episode_id: episode_id.unwrap_or_default(),
        },
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    action: i32,
    series_id: Option<i64>,
    episode_id: Option<i64>,
    movie_id: Option<i64>,
    timestamp: DateTime<Utc>,
    description: String,
    video_path: Option<String>,
    language: Option<String>,
    provider: Option<String>,
    score: Option<i32>,
    subs_id: Option<String>,
    subtitles_path: Option<String>,
}

impl HistoryRow {
    fn into_entry(self) -> HistoryEntry {
        HistoryEntry {
            id: self.id,
            media: media_ref(self.series_id, self.episode_id, self.movie_id),
            action: self.action,
            timestamp: self.timestamp,
            description: self.description,
            video_path: self.video_path,
            language: self.language,
            provider: self.provider,
            score: self.score,
            subs_id: self.subs_id,
            subtitles_path: self.subtitles_path,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BlacklistRow {
    series_id: Option<i64>,
    episode_id: Option<i64>,
    movie_id: Option<i64>,
    timestamp: DateTime<Utc>,
    provider: String,
    subs_id: String,
    language: Option<String>,
}

impl BlacklistRow {
    fn into_entry(self) -> BlacklistEntry {
        BlacklistEntry {
            media: media_ref(self.series_id, self.episode_id, self.movie_id),
            timestamp: self.timestamp,
            provider: self.provider,
            subs_id: self.subs_id,
            language: self.language,
        }
    }
}
