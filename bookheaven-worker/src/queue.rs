/// Orphaned blob queue
///
/// Image replacements delete the old file from blob storage after their
/// transaction commits. When that call fails the key lands in
/// `orphaned_blobs`, and this queue drains it.
///
/// # Sweep
///
/// 1. Claim due rows (`FOR UPDATE SKIP LOCKED`, leased for one base delay)
/// 2. Delete each key from storage
/// 3. Drop the row on success, reschedule with backoff on failure
///
/// Keys are deleted one at a time so a single bad key cannot hold back
/// the rest of the batch.
///
/// # Example
///
/// ```no_run
/// use bookheaven_worker::queue::BlobQueue;
/// use bookheaven_shared::storage::UploadThingClient;
/// use sqlx::PgPool;
/// use std::sync::Arc;
///
/// # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(UploadThingClient::new("https://api.uploadthing.com", "sk_live_..."));
/// let queue = BlobQueue::new(pool, store, 50);
///
/// let report = queue.sweep().await?;
/// println!("Deleted {} blobs", report.deleted);
/// # Ok(())
/// # }
/// ```

use bookheaven_shared::models::orphaned_blob::OrphanedBlob;
use bookheaven_shared::storage::BlobStore;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub claimed: usize,
    pub deleted: usize,
    pub rescheduled: usize,
}

#[derive(Clone)]
pub struct BlobQueue {
    db: PgPool,
    store: Arc<dyn BlobStore>,
    batch_size: i64,
}

impl BlobQueue {
    pub fn new(db: PgPool, store: Arc<dyn BlobStore>, batch_size: i64) -> Self {
        BlobQueue {
            db,
            store,
            batch_size,
        }
    }

    /// Runs one sweep over the due rows
    ///
    /// # Errors
    ///
    /// Returns error if claiming or updating a row fails. Storage failures
    /// are not errors; they reschedule the row.
    pub async fn sweep(&self) -> Result<SweepReport, QueueError> {
        let due = OrphanedBlob::claim_due(&self.db, self.batch_size).await?;

        let mut report = SweepReport {
            claimed: due.len(),
            ..SweepReport::default()
        };

        for blob in due {
            match self.store.delete_files(std::slice::from_ref(&blob.file_key)).await {
                Ok(()) => {
                    OrphanedBlob::resolve(&self.db, blob.id).await?;
                    report.deleted += 1;
                    tracing::debug!(file_key = %blob.file_key, "Deleted orphaned blob");
                }
                Err(e) => {
                    let rescheduled = OrphanedBlob::reschedule(&self.db, blob.id, &e.to_string()).await?;
                    report.rescheduled += 1;

                    if let Some(row) = rescheduled {
                        tracing::warn!(
                            file_key = %row.file_key,
                            attempts = row.attempts,
                            next_attempt_at = %row.next_attempt_at,
                            error = %e,
                            "Blob deletion failed, will retry"
                        );
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_report_default_is_empty() {
        let report = SweepReport::default();
        assert_eq!(report.claimed, 0);
        assert_eq!(report.deleted + report.rescheduled, 0);
    }

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::from(sqlx::Error::RowNotFound);
        assert!(err.to_string().starts_with("Database error"));
    }
}
