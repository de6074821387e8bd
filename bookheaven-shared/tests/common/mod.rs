//! Helpers for database-backed tests
//!
//! Tests return early when `DATABASE_URL` is not set, so the suite passes on
//! machines without PostgreSQL. Every fixture uses random names, so tests can
//! share one database and run in parallel.

#![allow(dead_code)]

use bookheaven_shared::db::migrations::run_migrations;
use bookheaven_shared::db::pool::{create_pool, DatabaseConfig};
use bookheaven_shared::models::author::{Author, CreateAuthor};
use bookheaven_shared::models::edition::{CreateEdition, Edition, EditionFormat};
use bookheaven_shared::models::work::{CreateWork, Work};
use sqlx::PgPool;
use uuid::Uuid;

pub fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty())
}

/// Connects and migrates, or `None` when no database is configured
pub async fn test_pool() -> Option<PgPool> {
    let url = database_url()?;
    let pool = create_pool(DatabaseConfig {
        max_connections: 5,
        ..DatabaseConfig::with_url(url)
    })
    .await
    .expect("Failed to connect to DATABASE_URL");

    run_migrations(&pool).await.expect("Failed to run migrations");
    Some(pool)
}

pub fn unique(prefix: &str) -> String {
    format!("{} {}", prefix, Uuid::new_v4().simple())
}

pub async fn author(pool: &PgPool) -> Author {
    Author::create(
        pool,
        CreateAuthor {
            name: unique("Author"),
            bio: None,
            birth_date: None,
            death_date: None,
        },
    )
    .await
    .expect("create author")
}

pub async fn work(pool: &PgPool, author_ids: Vec<Uuid>) -> Work {
    Work::create(
        pool,
        CreateWork {
            title: unique("Work"),
            description: None,
            original_language: Some("en".to_string()),
            first_published_year: Some(1965),
            author_ids,
        },
    )
    .await
    .expect("create work")
}

pub async fn edition(pool: &PgPool, work_id: Uuid, price_cents: i64, stock: i32) -> Edition {
    Edition::create(
        pool,
        CreateEdition {
            work_id,
            isbn: None,
            format: EditionFormat::Paperback,
            language: "en".to_string(),
            publisher: None,
            published_on: None,
            page_count: Some(412),
            price_cents,
            currency: "usd".to_string(),
            stock,
        },
    )
    .await
    .expect("create edition")
}

/// A paperback of a fresh work by a fresh author
pub async fn stocked_edition(pool: &PgPool, price_cents: i64, stock: i32) -> Edition {
    let author = author(pool).await;
    let work = work(pool, vec![author.id]).await;
    edition(pool, work.id, price_cents, stock).await
}
