//! # BookHeaven API Server
//!
//! Serves the bookstore's catalog, community and checkout endpoints.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/bookheaven \
//! SESSION_SECRET=dev-secret-that-is-at-least-32-bytes \
//! cargo run -p bookheaven-api
//! ```
//!
//! Set `LOG_FORMAT=json` for JSON logs and `RUST_LOG` to adjust levels.

use bookheaven_api::{
    app::{build_router, AppState},
    config::Config,
};
use bookheaven_shared::{
    db::{migrations, pool},
    redis::{RateLimiter, RedisClient, RedisConfig},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bookheaven_api=debug,bookheaven_shared=info,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!(
        "BookHeaven API Server v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;

    let mut db_config = pool::DatabaseConfig::with_url(config.database.url.clone());
    db_config.max_connections = config.database.max_connections;
    let db = pool::create_pool(db_config).await?;

    migrations::run_migrations(&db).await?;

    let rate_limiter = match &config.redis_url {
        Some(url) => {
            let client = RedisClient::new(RedisConfig::new(url.clone())).await?;
            tracing::info!("Rate limiting enabled");
            Some(RateLimiter::new(client))
        }
        None => {
            tracing::warn!("REDIS_URL not set; rate limiting disabled");
            None
        }
    };

    let bind_address = config.bind_address();

    let mut state = AppState::new(db.clone(), config)?;
    if let Some(limiter) = rate_limiter {
        state = state.with_rate_limiter(limiter);
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool::close_pool(db).await;
    tracing::info!("Server stopped");

    Ok(())
}
