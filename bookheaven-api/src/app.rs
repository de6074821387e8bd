/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use bookheaven_api::{app::AppState, config::Config};
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let state = AppState::new(pool, config)?;
/// let app = bookheaven_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::Config,
    error::ApiError,
    middleware::{rate_limit, security::SecurityHeadersLayer},
    routes,
};
use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self as axum_middleware, Next},
    response::Response,
    routing::{get, patch, post, put},
    Extension, Router,
};
use bookheaven_shared::{
    auth::{
        authorization::require_admin,
        jwt::SessionVerifier,
        middleware::{optional_session_middleware, session_auth_middleware, AuthContext},
    },
    identity::{ClerkClient, IdentityProvider},
    payments::{PaymentGateway, StripeClient},
    redis::RateLimiter,
    storage::{BlobStore, NoopBlobStore, UploadThingClient},
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
/// External services sit behind traits so tests can swap in fakes.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Application configuration
    pub config: Arc<Config>,

    pub verifier: Arc<SessionVerifier>,

    pub blob_store: Arc<dyn BlobStore>,

    /// `None` when Stripe is not configured; checkout answers 503
    pub payments: Option<Arc<dyn PaymentGateway>>,

    /// `None` when the identity provider secret is not configured
    pub identity: Option<Arc<dyn IdentityProvider>>,

    /// `None` disables rate limiting
    pub rate_limiter: Option<RateLimiter>,
}

impl AppState {
    /// Creates application state with the HTTP clients the config enables
    ///
    /// # Errors
    ///
    /// Fails if the session key cannot be built.
    pub fn new(db: PgPool, config: Config) -> anyhow::Result<Self> {
        let verifier = Arc::new(SessionVerifier::new(
            config.session_key()?,
            config.auth.issuer.clone(),
        ));

        let blob_store: Arc<dyn BlobStore> = match &config.storage.secret {
            Some(secret) => Arc::new(UploadThingClient::new(&config.storage.api_url, secret)),
            None => {
                tracing::warn!("UPLOADTHING_SECRET not set; replaced images stay in storage");
                Arc::new(NoopBlobStore)
            }
        };

        let payments: Option<Arc<dyn PaymentGateway>> =
            match (&config.stripe.secret_key, &config.stripe.webhook_secret) {
                (Some(secret), Some(webhook_secret)) => Some(Arc::new(StripeClient::new(
                    &config.stripe.api_url,
                    secret,
                    webhook_secret,
                ))),
                _ => {
                    tracing::warn!("Stripe keys not set; checkout is disabled");
                    None
                }
            };

        let identity: Option<Arc<dyn IdentityProvider>> = config
            .identity
            .secret_key
            .as_ref()
            .map(|secret| Arc::new(ClerkClient::new(&config.identity.api_url, secret)) as Arc<dyn IdentityProvider>);

        Ok(Self {
            db,
            config: Arc::new(config),
            verifier,
            blob_store,
            payments,
            identity,
            rate_limiter: None,
        })
    }

    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = store;
        self
    }

    pub fn with_payments(mut self, payments: Arc<dyn PaymentGateway>) -> Self {
        self.payments = Some(payments);
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// The payment gateway, or 503 when checkout is disabled
    pub fn payments(&self) -> Result<&Arc<dyn PaymentGateway>, ApiError> {
        self.payments
            .as_ref()
            .ok_or_else(|| ApiError::ServiceUnavailable("Checkout is not available".to_string()))
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /health                                  public
/// /v1
/// ├── catalog reads                        public, session optional
/// │   authors, works, editions, tags, reviews, rating, shelves
/// ├── POST /webhooks/stripe                signature-verified
/// ├── /me, reviews, likes, shelves,        session required
/// │   checkout, orders                     (writes and checkout rate limited)
/// └── catalog writes, /admin/orders        session + admin role
/// ```
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. Security headers
/// 2. CORS (tower-http CorsLayer)
/// 3. Response compression (gzip, brotli)
/// 4. Logging (tower-http TraceLayer)
/// 5. Authentication and rate limiting (per route group)
pub fn build_router(state: AppState) -> Router {
    let verifier = state.verifier.clone();

    let optional_auth = {
        let verifier = verifier.clone();
        axum_middleware::from_fn(move |req: Request, next: Next| {
            optional_session_middleware(verifier.clone(), req, next)
        })
    };
    let required_auth = {
        let verifier = verifier.clone();
        axum_middleware::from_fn(move |req: Request, next: Next| {
            session_auth_middleware(verifier.clone(), req, next)
        })
    };

    // Health check (public, no auth)
    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    // Catalog and community reads
    let public_routes = Router::new()
        .route("/authors", get(routes::authors::list_authors))
        .route("/authors/:id", get(routes::authors::get_author))
        .route("/works", get(routes::works::list_works))
        .route("/works/:id", get(routes::works::get_work))
        .route("/editions", get(routes::editions::list_editions))
        .route("/editions/:id", get(routes::editions::get_edition))
        .route("/editions/:id/images", get(routes::images::list_edition_images))
        .route("/editions/:id/reviews", get(routes::reviews::list_edition_reviews))
        .route("/editions/:id/rating", get(routes::reviews::get_rating))
        .route("/tags", get(routes::tags::list_tags))
        .route("/shelves/:id", get(routes::shelves::get_shelf))
        .route("/shelves/:id/items", get(routes::shelves::list_shelf_items))
        .route("/users/:user_id/shelves", get(routes::shelves::list_user_shelves))
        .route_layer(optional_auth);

    let webhook_routes =
        Router::new().route("/webhooks/stripe", post(routes::webhooks::stripe_webhook));

    // Reviews, likes and shelf edits share the write bucket
    let write_routes = Router::new()
        .route("/editions/:id/reviews", post(routes::reviews::create_review))
        .route(
            "/reviews/:id",
            patch(routes::reviews::update_review).delete(routes::reviews::delete_review),
        )
        .route("/reviews/:id/like", post(routes::reviews::toggle_like))
        .route("/shelves", post(routes::shelves::create_shelf))
        .route(
            "/shelves/:id",
            patch(routes::shelves::update_shelf).delete(routes::shelves::delete_shelf),
        )
        .route(
            "/shelves/:id/items/:edition_id",
            put(routes::shelves::add_shelf_item).delete(routes::shelves::remove_shelf_item),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_writes,
        ));

    let checkout_routes = Router::new()
        .route("/checkout", post(routes::orders::checkout))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_checkout,
        ));

    let account_routes = Router::new()
        .route("/me", get(routes::me::get_me))
        .route("/me/shelves", get(routes::me::my_shelves))
        .route("/me/reviews", get(routes::me::my_reviews))
        .route("/me/orders", get(routes::me::my_orders))
        .route("/orders/:id", get(routes::orders::get_order))
        .merge(write_routes)
        .merge(checkout_routes)
        .route_layer(required_auth.clone());

    let admin_routes = Router::new()
        .route("/authors", post(routes::authors::create_author))
        .route(
            "/authors/:id",
            patch(routes::authors::update_author).delete(routes::authors::delete_author),
        )
        .route(
            "/authors/:id/image",
            put(routes::images::replace_author_image).delete(routes::images::remove_author_image),
        )
        .route("/works", post(routes::works::create_work))
        .route(
            "/works/:id",
            patch(routes::works::update_work).delete(routes::works::delete_work),
        )
        .route(
            "/works/:id/tags/:tag_id",
            put(routes::tags::attach_tag).delete(routes::tags::detach_tag),
        )
        .route("/editions", post(routes::editions::create_edition))
        .route(
            "/editions/:id",
            patch(routes::editions::update_edition).delete(routes::editions::delete_edition),
        )
        .route(
            "/editions/:id/image",
            put(routes::images::replace_edition_image).delete(routes::images::remove_edition_image),
        )
        .route("/tags", post(routes::tags::create_tag))
        .route(
            "/tags/:id",
            patch(routes::tags::rename_tag).delete(routes::tags::delete_tag),
        )
        .route("/admin/orders", get(routes::orders::list_all_orders))
        .route("/admin/orders/:id", patch(routes::orders::update_order_status))
        .route_layer(axum_middleware::from_fn(admin_only_layer))
        .route_layer(required_auth);

    // Build complete v1 API
    let v1_routes = Router::new()
        .merge(public_routes)
        .merge(webhook_routes)
        .merge(account_routes)
        .merge(admin_routes);

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config))
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.allows_any_origin() {
        // Development mode: permissive CORS
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .api
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

/// Rejects authenticated callers without the admin role
async fn admin_only_layer(
    Extension(auth): Extension<AuthContext>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    require_admin(&auth)?;
    Ok(next.run(req).await)
}
