/// Blob keys whose deletion from storage failed and must be retried
///
/// Rows are written by the API after a failed post-commit cleanup and
/// drained by the worker. Claiming uses `FOR UPDATE SKIP LOCKED` so several
/// workers can sweep concurrently without deleting the same key twice.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// First retry delay; doubles with every failed attempt
pub const BASE_RETRY_DELAY_SECS: i64 = 30;

/// Upper bound on the retry delay (6 hours)
pub const MAX_RETRY_DELAY_SECS: i64 = 6 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrphanedBlob {
    pub id: Uuid,
    pub file_key: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
}

/// Delay before the next attempt once `attempts` deletions have failed
pub fn retry_delay(attempts: i32) -> Duration {
    let exponent = attempts.clamp(0, 20) as u32;
    let secs = BASE_RETRY_DELAY_SECS
        .saturating_mul(2i64.saturating_pow(exponent))
        .min(MAX_RETRY_DELAY_SECS);
    Duration::seconds(secs)
}

impl OrphanedBlob {
    /// Queues keys for deletion; keys already queued keep their schedule
    pub async fn record(pool: &PgPool, keys: &[String], error: &str) -> Result<u64, sqlx::Error> {
        if keys.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "INSERT INTO orphaned_blobs (file_key, last_error)
             SELECT key, $2 FROM UNNEST($1::text[]) AS k(key)
             ON CONFLICT (file_key) DO UPDATE SET last_error = EXCLUDED.last_error",
        )
        .bind(keys)
        .bind(error)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Claims up to `limit` due rows by pushing their next attempt out
    ///
    /// The claim lease (one base delay) keeps a concurrent sweep from picking
    /// the same rows while this one is still talking to storage.
    pub async fn claim_due(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, OrphanedBlob>(
            "UPDATE orphaned_blobs
             SET next_attempt_at = NOW() + make_interval(secs => $2)
             WHERE id IN (
                 SELECT id FROM orphaned_blobs
                 WHERE next_attempt_at <= NOW()
                 ORDER BY next_attempt_at ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, file_key, attempts, last_error, created_at, next_attempt_at",
        )
        .bind(limit)
        .bind(BASE_RETRY_DELAY_SECS as f64)
        .fetch_all(pool)
        .await
    }

    /// Drops a row once its blob is gone
    pub async fn resolve(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM orphaned_blobs WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a failed attempt and schedules the next one with backoff
    pub async fn reschedule(pool: &PgPool, id: Uuid, error: &str) -> Result<Option<Self>, sqlx::Error> {
        let attempts: Option<i32> =
            sqlx::query_scalar("SELECT attempts FROM orphaned_blobs WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;

        let Some(attempts) = attempts else {
            return Ok(None);
        };

        let next_attempt_at = Utc::now() + retry_delay(attempts + 1);

        sqlx::query_as::<_, OrphanedBlob>(
            "UPDATE orphaned_blobs
             SET attempts = attempts + 1, last_error = $2, next_attempt_at = $3
             WHERE id = $1
             RETURNING id, file_key, attempts, last_error, created_at, next_attempt_at",
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .fetch_optional(pool)
        .await
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM orphaned_blobs")
            .fetch_one(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        assert_eq!(retry_delay(0), Duration::seconds(30));
        assert_eq!(retry_delay(1), Duration::seconds(60));
        assert_eq!(retry_delay(3), Duration::seconds(240));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        assert_eq!(retry_delay(10), Duration::seconds(MAX_RETRY_DELAY_SECS));
        assert_eq!(retry_delay(i32::MAX), Duration::seconds(MAX_RETRY_DELAY_SECS));
    }

    #[test]
    fn test_negative_attempts_use_base_delay() {
        assert_eq!(retry_delay(-4), Duration::seconds(BASE_RETRY_DELAY_SECS));
    }
}
