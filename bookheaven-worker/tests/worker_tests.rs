/// Database tests for the worker jobs
///
/// Skipped when `DATABASE_URL` is not set.

use async_trait::async_trait;
use bookheaven_shared::db::migrations::run_migrations;
use bookheaven_shared::db::pool::{create_pool, DatabaseConfig};
use bookheaven_shared::models::author::{Author, CreateAuthor};
use bookheaven_shared::models::edition::{CreateEdition, Edition, EditionFormat};
use bookheaven_shared::models::order::{CartLine, Order, OrderStatus};
use bookheaven_shared::models::orphaned_blob::OrphanedBlob;
use bookheaven_shared::models::work::{CreateWork, Work};
use bookheaven_shared::storage::{BlobStore, StorageError};
use bookheaven_worker::expiry::OrderExpiry;
use bookheaven_worker::queue::BlobQueue;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty())?;
    let pool = create_pool(DatabaseConfig {
        max_connections: 5,
        ..DatabaseConfig::with_url(url)
    })
    .await
    .expect("Failed to connect to DATABASE_URL");

    run_migrations(&pool).await.expect("Failed to run migrations");
    Some(pool)
}

async fn stocked_edition(pool: &PgPool, stock: i32) -> Edition {
    let author = Author::create(
        pool,
        CreateAuthor {
            name: format!("Author {}", Uuid::new_v4().simple()),
            bio: None,
            birth_date: None,
            death_date: None,
        },
    )
    .await
    .unwrap();

    let work = Work::create(
        pool,
        CreateWork {
            title: format!("Work {}", Uuid::new_v4().simple()),
            description: None,
            original_language: None,
            first_published_year: None,
            author_ids: vec![author.id],
        },
    )
    .await
    .unwrap();

    Edition::create(
        pool,
        CreateEdition {
            work_id: work.id,
            isbn: None,
            format: EditionFormat::Hardcover,
            language: "en".to_string(),
            publisher: None,
            published_on: None,
            page_count: None,
            price_cents: 2500,
            currency: "usd".to_string(),
            stock,
        },
    )
    .await
    .unwrap()
}

/// Fails for keys starting with `bad_`, records the rest
#[derive(Default)]
struct FlakyStore {
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn delete_files(&self, keys: &[String]) -> Result<(), StorageError> {
        if keys.iter().any(|key| key.starts_with("bad_")) {
            return Err(StorageError::Upstream {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.deleted.lock().unwrap().extend_from_slice(keys);
        Ok(())
    }
}

#[tokio::test]
async fn test_sweep_resolves_and_reschedules() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let good = format!("good_{}", Uuid::new_v4().simple());
    let bad = format!("bad_{}", Uuid::new_v4().simple());
    OrphanedBlob::record(&pool, &[good.clone(), bad.clone()], "timeout")
        .await
        .unwrap();

    let store = Arc::new(FlakyStore::default());
    let queue = BlobQueue::new(pool.clone(), store.clone(), 1000);

    let report = queue.sweep().await.unwrap();
    assert!(report.deleted >= 1);
    assert!(report.rescheduled >= 1);
    assert!(store.deleted.lock().unwrap().contains(&good));

    let rows: Vec<(String, i32)> = sqlx::query_as(
        "SELECT file_key, attempts FROM orphaned_blobs WHERE file_key = ANY($1)",
    )
    .bind(vec![good.clone(), bad.clone()])
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(rows, vec![(bad.clone(), 1)]);

    // Not due again until the backoff passes
    queue.sweep().await.unwrap();
    assert!(!store.deleted.lock().unwrap().contains(&bad));
    let still_queued: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM orphaned_blobs WHERE file_key = $1")
            .bind(&bad)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(still_queued, 1);
}

#[tokio::test]
async fn test_expire_returns_stock() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let edition = stocked_edition(&pool, 5).await;
    let user_id = format!("user_{}", Uuid::new_v4().simple());

    let stale = Order::create_pending(
        &pool,
        &user_id,
        &[CartLine {
            edition_id: edition.id,
            quantity: 2,
        }],
    )
    .await
    .unwrap();
    let fresh = Order::create_pending(
        &pool,
        &user_id,
        &[CartLine {
            edition_id: edition.id,
            quantity: 1,
        }],
    )
    .await
    .unwrap();

    sqlx::query("UPDATE orders SET created_at = NOW() - INTERVAL '3 hours' WHERE id = $1")
        .bind(stale.order.id)
        .execute(&pool)
        .await
        .unwrap();

    let expiry = OrderExpiry::new(pool.clone(), chrono::Duration::hours(2), 1000);
    let expired = expiry.expire().await.unwrap();
    assert!(expired >= 1);

    let stale = Order::find_by_id(&pool, stale.order.id).await.unwrap().unwrap();
    let fresh = Order::find_by_id(&pool, fresh.order.id).await.unwrap().unwrap();
    assert_eq!(stale.status, OrderStatus::Cancelled);
    assert_eq!(fresh.status, OrderStatus::Pending);

    let edition = Edition::find_by_id(&pool, edition.id).await.unwrap().unwrap();
    assert_eq!(edition.stock, 4);
}
