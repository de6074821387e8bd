//! # BookHeaven Worker
//!
//! Sweeps orphaned blobs and expires abandoned checkouts.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/bookheaven cargo run -p bookheaven-worker
//! ```
//!
//! Set `LOG_FORMAT=json` for JSON logs and `RUST_LOG` to adjust levels.

use bookheaven_shared::{db::pool, storage::UploadThingClient};
use bookheaven_worker::{
    config::WorkerConfig,
    expiry::OrderExpiry,
    orchestrator::{OrchestratorConfig, WorkerOrchestrator},
    queue::BlobQueue,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bookheaven_worker=debug,bookheaven_shared=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!(
        "BookHeaven Worker v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = WorkerConfig::from_env()?;

    let mut db_config = pool::DatabaseConfig::with_url(config.database_url.clone());
    db_config.max_connections = config.max_connections;
    let db = pool::create_pool(db_config).await?;

    let blobs = match &config.storage_secret {
        Some(secret) => {
            let store = Arc::new(UploadThingClient::new(&config.storage_api_url, secret));
            Some(BlobQueue::new(db.clone(), store, config.batch_size))
        }
        None => {
            tracing::warn!("UPLOADTHING_SECRET not set; orphaned blobs stay queued");
            None
        }
    };

    let expiry = OrderExpiry::new(db.clone(), config.pending_order_ttl, config.batch_size);

    let orchestrator = WorkerOrchestrator::new(
        blobs,
        expiry,
        OrchestratorConfig {
            poll_interval: config.poll_interval,
        },
    );

    let shutdown = orchestrator.shutdown_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received, finishing current sweep...");
        shutdown.cancel();
    });

    orchestrator.run().await?;

    pool::close_pool(db).await;
    tracing::info!("Worker stopped");

    Ok(())
}
