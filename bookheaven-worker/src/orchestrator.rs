/// Worker orchestrator
///
/// Runs the background jobs on a fixed interval until shutdown.
///
/// # Architecture
///
/// ```text
/// Orchestrator (every poll interval)
///   ├─> BlobQueue: Retry failed blob deletions
///   └─> OrderExpiry: Cancel stale pending orders, returning stock
/// ```
///
/// A failing job is logged and retried on the next tick; it never stops
/// the loop or the other job.
///
/// # Example
///
/// ```no_run
/// use bookheaven_worker::orchestrator::{OrchestratorConfig, WorkerOrchestrator};
/// use bookheaven_worker::expiry::OrderExpiry;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> anyhow::Result<()> {
/// let expiry = OrderExpiry::new(pool, chrono::Duration::hours(25), 50);
/// let orchestrator = WorkerOrchestrator::new(None, expiry, OrchestratorConfig::default());
///
/// let shutdown = orchestrator.shutdown_token();
/// tokio::spawn(async move {
///     let _ = tokio::signal::ctrl_c().await;
///     shutdown.cancel();
/// });
///
/// orchestrator.run().await?;
/// # Ok(())
/// # }
/// ```

use crate::expiry::OrderExpiry;
use crate::queue::{BlobQueue, SweepReport};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Pause between ticks
    pub poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            poll_interval: Duration::from_secs(crate::config::DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

/// Results of one tick; `None` for a job that failed or is disabled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub blobs: Option<SweepReport>,
    pub expired_orders: Option<usize>,
}

pub struct WorkerOrchestrator {
    /// `None` when blob storage is not configured
    blobs: Option<BlobQueue>,

    expiry: OrderExpiry,

    config: OrchestratorConfig,

    shutdown_token: CancellationToken,
}

impl WorkerOrchestrator {
    pub fn new(blobs: Option<BlobQueue>, expiry: OrderExpiry, config: OrchestratorConfig) -> Self {
        WorkerOrchestrator {
            blobs,
            expiry,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Gets shutdown token
    ///
    /// Used to signal graceful shutdown from external handlers.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Runs both jobs once
    pub async fn tick(&self) -> TickReport {
        let blobs = match &self.blobs {
            Some(queue) => match queue.sweep().await {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::error!(error = %e, "Orphaned blob sweep failed");
                    None
                }
            },
            None => None,
        };

        let expired_orders = match self.expiry.expire().await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::error!(error = %e, "Order expiry failed");
                None
            }
        };

        TickReport {
            blobs,
            expired_orders,
        }
    }

    /// Runs the worker loop until the shutdown token is cancelled
    ///
    /// A tick in progress finishes before the loop exits.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            blob_sweep = self.blobs.is_some(),
            "Worker orchestrator starting"
        );

        loop {
            if self.shutdown_token.is_cancelled() {
                break;
            }

            let report = self.tick().await;
            let blobs = report.blobs.unwrap_or_default();
            if blobs.claimed > 0 || report.expired_orders.unwrap_or(0) > 0 {
                tracing::info!(
                    blobs_deleted = blobs.deleted,
                    blobs_rescheduled = blobs.rescheduled,
                    expired_orders = report.expired_orders.unwrap_or(0),
                    "Sweep finished"
                );
            } else {
                tracing::debug!("Sweep finished with nothing to do");
            }

            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!("Worker orchestrator shut down");
        Ok(())
    }
}
