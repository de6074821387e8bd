//! Common test utilities for integration tests
//!
//! - Router construction with fake payment and storage providers
//! - Session token generation
//! - Request helpers returning status and JSON body
//!
//! Tests that need PostgreSQL use [`TestContext::with_database`], which
//! returns `None` when `DATABASE_URL` is not set so the test can skip.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use bookheaven_api::{
    app::{build_router, AppState},
    config::{ApiConfig, AuthConfig, Config, DatabaseConfig, IdentityConfig, StorageConfig, StripeConfig},
};
use bookheaven_shared::{
    auth::{
        jwt::{create_session_token, Claims, SessionKey},
        middleware::Role,
    },
    db::{migrations, pool},
    identity::DEFAULT_CLERK_API_URL,
    models::order::Order,
    payments::{
        stripe::DEFAULT_STRIPE_API_URL,
        webhook::{parse_event, sign_payload, verify_webhook, DEFAULT_TOLERANCE_SECS},
        CheckoutRequest, CheckoutSession, PaymentError, PaymentGateway, WebhookEvent,
    },
    storage::{BlobStore, StorageError, DEFAULT_UPLOADTHING_API_URL},
};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tower::Service as _;
use uuid::Uuid;

pub const SESSION_SECRET: &str = "integration-test-secret-at-least-32-bytes";
pub const WEBHOOK_SECRET: &str = "whsec_integration_test";

/// Payment gateway that records checkout requests instead of calling out
#[derive(Default)]
pub struct FakeGateway {
    pub requests: Mutex<Vec<CheckoutRequest>>,
    pub fail: AtomicBool,
    /// When set, the order is paid through this pool before the session is
    /// returned, as if the completion webhook won the race
    pub settle_early: Mutex<Option<PgPool>>,
    counter: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentError::Upstream {
                status: 500,
                body: "provider down".to_string(),
            });
        }

        self.requests.lock().unwrap().push(request.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("cs_test_{}_{}", n, Uuid::new_v4().simple());

        let settle_early = self.settle_early.lock().unwrap().clone();
        if let Some(db) = settle_early {
            assert!(Order::attach_checkout_session(&db, request.order_id, &id).await.unwrap());
            Order::mark_paid(&db, &id, Some("pi_early"), None).await.unwrap();
        }

        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.test/pay/{}", id),
            id,
        })
    }

    fn parse_webhook(&self, payload: &[u8], signature_header: &str) -> Result<WebhookEvent, PaymentError> {
        verify_webhook(payload, signature_header, WEBHOOK_SECRET, DEFAULT_TOLERANCE_SECS)?;
        parse_event(payload)
    }
}

/// Blob store that remembers every key it was asked to delete
#[derive(Default)]
pub struct RecordingBlobStore {
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn delete_files(&self, keys: &[String]) -> Result<(), StorageError> {
        self.deleted.lock().unwrap().extend_from_slice(keys);
        Ok(())
    }
}

pub fn test_config(database_url: &str) -> Config {
    Config {
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            production: false,
        },
        database: DatabaseConfig {
            url: database_url.to_string(),
            max_connections: 5,
        },
        auth: AuthConfig {
            jwt_public_key: None,
            session_secret: Some(SESSION_SECRET.to_string()),
            issuer: None,
        },
        identity: IdentityConfig {
            api_url: DEFAULT_CLERK_API_URL.to_string(),
            secret_key: None,
        },
        stripe: StripeConfig {
            api_url: DEFAULT_STRIPE_API_URL.to_string(),
            secret_key: None,
            webhook_secret: None,
            success_url: "http://localhost:3000/checkout/success".to_string(),
            cancel_url: "http://localhost:3000/cart".to_string(),
        },
        storage: StorageConfig {
            api_url: DEFAULT_UPLOADTHING_API_URL.to_string(),
            secret: None,
        },
        redis_url: None,
    }
}

/// Test context containing the router and its fakes
pub struct TestContext {
    pub db: PgPool,
    pub app: Router,
    pub gateway: Arc<FakeGateway>,
    pub blobs: Arc<RecordingBlobStore>,
}

impl TestContext {
    fn build(db: PgPool, database_url: &str, payments: bool) -> Self {
        let gateway = Arc::new(FakeGateway::default());
        let blobs = Arc::new(RecordingBlobStore::default());

        let mut state = AppState::new(db.clone(), test_config(database_url))
            .expect("valid test config")
            .with_blob_store(blobs.clone());
        if payments {
            state = state.with_payments(gateway.clone());
        }

        TestContext {
            db,
            app: build_router(state),
            gateway,
            blobs,
        }
    }

    /// Router over a pool that never connects, for requests rejected
    /// before any query runs
    pub fn offline() -> Self {
        Self::offline_with(true)
    }

    pub fn offline_with(payments: bool) -> Self {
        let url = "postgresql://bookheaven@127.0.0.1:1/unreachable";
        let db = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(250))
            .connect_lazy(url)
            .expect("lazy pool");
        Self::build(db, url, payments)
    }

    /// Router over a migrated test database, or `None` without `DATABASE_URL`
    pub async fn with_database() -> Option<Self> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set; skipping");
            return None;
        };

        let mut config = pool::DatabaseConfig::with_url(url.clone());
        config.max_connections = 5;
        let db = pool::create_pool(config).await.expect("database connection");
        migrations::run_migrations(&db).await.expect("migrations");

        Some(Self::build(db, &url, true))
    }

    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.call(request).await
    }

    pub async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().call(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Delivers a webhook signed with the test secret
    pub async fn deliver_webhook(&self, event: Value) -> (StatusCode, Value) {
        let payload = event.to_string();
        let signature = sign_payload(
            payload.as_bytes(),
            WEBHOOK_SECRET,
            chrono::Utc::now().timestamp(),
        )
        .unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/v1/webhooks/stripe")
            .header("content-type", "application/json")
            .header("stripe-signature", signature)
            .body(Body::from(payload))
            .unwrap();

        self.call(request).await
    }
}

/// Signs a session token for `user_id`
pub fn token(user_id: &str, role: Role) -> String {
    let claims = Claims::new(user_id, role, chrono::Duration::minutes(10));
    create_session_token(&claims, &SessionKey::hmac(SESSION_SECRET)).unwrap()
}

pub fn unique_user() -> String {
    format!("user_{}", Uuid::new_v4().simple())
}

/// A `checkout.session.*` event body
pub fn checkout_event(kind: &str, session_id: &str, order_id: Uuid, payment_status: &str) -> Value {
    serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": kind,
        "data": { "object": {
            "id": session_id,
            "payment_intent": "pi_test_1",
            "payment_status": payment_status,
            "customer_details": { "email": "reader@example.com" },
            "client_reference_id": order_id.to_string(),
            "metadata": { "order_id": order_id.to_string() }
        }}
    })
}
