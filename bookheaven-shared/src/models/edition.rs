/// Book edition model: a purchasable version of a work
///
/// # Schema
///
/// ```sql
/// CREATE TYPE edition_format AS ENUM ('hardcover', 'paperback', 'ebook', 'audiobook');
///
/// CREATE TABLE book_editions (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     work_id UUID NOT NULL REFERENCES book_works(id) ON DELETE CASCADE,
///     isbn VARCHAR(17) UNIQUE,
///     format edition_format NOT NULL,
///     language VARCHAR(16) NOT NULL DEFAULT 'en',
///     publisher VARCHAR(255),
///     published_on DATE,
///     page_count INTEGER,
///     price_cents BIGINT NOT NULL,
///     currency VARCHAR(3) NOT NULL DEFAULT 'usd',
///     stock INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0),
///     image_url VARCHAR(1024),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{is_foreign_key_violation, is_unique_violation, ModelError};
use crate::pagination::{like_pattern, Page, PageRequest};

const EDITION_COLUMNS: &str = "id, work_id, isbn, format, language, publisher, published_on, \
     page_count, price_cents, currency, stock, image_url, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "edition_format", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EditionFormat {
    Hardcover,
    Paperback,
    Ebook,
    Audiobook,
}

impl EditionFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditionFormat::Hardcover => "hardcover",
            EditionFormat::Paperback => "paperback",
            EditionFormat::Ebook => "ebook",
            EditionFormat::Audiobook => "audiobook",
        }
    }

    /// Digital formats are never out of stock
    pub fn is_digital(&self) -> bool {
        matches!(self, EditionFormat::Ebook | EditionFormat::Audiobook)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Edition {
    pub id: Uuid,
    pub work_id: Uuid,
    pub isbn: Option<String>,
    pub format: EditionFormat,
    pub language: String,
    pub publisher: Option<String>,
    pub published_on: Option<NaiveDate>,
    pub page_count: Option<i32>,
    pub price_cents: i64,
    /// Lowercase ISO 4217 code, as Stripe expects it
    pub currency: String,
    pub stock: i32,
    /// Current cover URL (mirrors the single row in `book_images`)
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edition {
    /// Whether `quantity` copies can be sold right now
    pub fn can_fulfil(&self, quantity: i32) -> bool {
        self.format.is_digital() || self.stock >= quantity
    }
}

/// Row returned by edition listings
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EditionListItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub edition: Edition,
    pub work_title: String,
    pub author_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEdition {
    pub work_id: Uuid,
    pub isbn: Option<String>,
    pub format: EditionFormat,
    pub language: String,
    pub publisher: Option<String>,
    pub published_on: Option<NaiveDate>,
    pub page_count: Option<i32>,
    pub price_cents: i64,
    pub currency: String,
    pub stock: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateEdition {
    pub isbn: Option<Option<String>>,
    pub format: Option<EditionFormat>,
    pub language: Option<String>,
    pub publisher: Option<Option<String>>,
    pub published_on: Option<Option<NaiveDate>>,
    pub page_count: Option<Option<i32>>,
    pub price_cents: Option<i64>,
    pub currency: Option<String>,
    pub stock: Option<i32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditionSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Title,
}

impl EditionSort {
    fn order_by(&self) -> &'static str {
        match self {
            EditionSort::Newest => "e.created_at DESC, e.id ASC",
            EditionSort::PriceAsc => "e.price_cents ASC, e.id ASC",
            EditionSort::PriceDesc => "e.price_cents DESC, e.id ASC",
            EditionSort::Title => "lower(w.title) ASC, e.id ASC",
        }
    }
}

/// Filters for [`Edition::list`]
#[derive(Debug, Clone, Default)]
pub struct EditionFilter {
    pub work_id: Option<Uuid>,
    pub format: Option<EditionFormat>,
    /// Matches work title or ISBN
    pub search: Option<String>,
    pub sort: EditionSort,
}

const EDITION_FILTER_SQL: &str = "
    ($1::uuid IS NULL OR e.work_id = $1)
    AND ($2::edition_format IS NULL OR e.format = $2)
    AND ($3::text IS NULL OR w.title ILIKE $3 OR e.isbn ILIKE $3)";

fn map_write_error(err: sqlx::Error) -> ModelError {
    if is_unique_violation(&err) {
        ModelError::Conflict("an edition with this ISBN already exists".to_string())
    } else if is_foreign_key_violation(&err) {
        ModelError::NotFound("Work")
    } else {
        ModelError::Database(err)
    }
}

impl Edition {
    /// # Errors
    ///
    /// - `ModelError::NotFound("Work")` if the work does not exist
    /// - `ModelError::Conflict` on a duplicate ISBN
    pub async fn create(pool: &PgPool, data: CreateEdition) -> Result<Self, ModelError> {
        let edition = sqlx::query_as::<_, Edition>(&format!(
            "INSERT INTO book_editions
                (work_id, isbn, format, language, publisher, published_on, page_count,
                 price_cents, currency, stock)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, lower($9), $10)
             RETURNING {EDITION_COLUMNS}"
        ))
        .bind(data.work_id)
        .bind(data.isbn)
        .bind(data.format)
        .bind(data.language)
        .bind(data.publisher)
        .bind(data.published_on)
        .bind(data.page_count)
        .bind(data.price_cents)
        .bind(data.currency)
        .bind(data.stock)
        .fetch_one(pool)
        .await
        .map_err(map_write_error)?;

        tracing::info!(edition_id = %edition.id, work_id = %edition.work_id, "Created edition");
        Ok(edition)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Edition>(&format!(
            "SELECT {EDITION_COLUMNS} FROM book_editions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Loads every edition in `ids` that exists, in no particular order
    pub async fn find_many(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<Self>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, Edition>(&format!(
            "SELECT {EDITION_COLUMNS} FROM book_editions WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateEdition,
    ) -> Result<Option<Self>, ModelError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE book_editions SET updated_at = NOW()");

        if let Some(isbn) = data.isbn {
            qb.push(", isbn = ").push_bind(isbn);
        }
        if let Some(format) = data.format {
            qb.push(", format = ").push_bind(format);
        }
        if let Some(language) = data.language {
            qb.push(", language = ").push_bind(language);
        }
        if let Some(publisher) = data.publisher {
            qb.push(", publisher = ").push_bind(publisher);
        }
        if let Some(published_on) = data.published_on {
            qb.push(", published_on = ").push_bind(published_on);
        }
        if let Some(page_count) = data.page_count {
            qb.push(", page_count = ").push_bind(page_count);
        }
        if let Some(price_cents) = data.price_cents {
            qb.push(", price_cents = ").push_bind(price_cents);
        }
        if let Some(currency) = data.currency {
            qb.push(", currency = lower(").push_bind(currency).push(")");
        }
        if let Some(stock) = data.stock {
            qb.push(", stock = ").push_bind(stock);
        }
        qb.push(" WHERE id = ")
            .push_bind(id)
            .push(format!(" RETURNING {EDITION_COLUMNS}"));

        qb.build_query_as::<Edition>()
            .fetch_optional(pool)
            .await
            .map_err(map_write_error)
    }

    /// Deletes an edition and returns its image keys
    ///
    /// # Errors
    ///
    /// `ModelError::Conflict` if the edition appears in an order.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<Option<Vec<String>>, ModelError> {
        let mut tx = pool.begin().await?;

        let keys: Vec<String> =
            sqlx::query_scalar("SELECT file_key FROM book_images WHERE edition_id = $1")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        let result = sqlx::query("DELETE FROM book_editions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    ModelError::Conflict("edition is referenced by orders".to_string())
                } else {
                    ModelError::Database(e)
                }
            })?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(keys))
    }

    pub async fn list(
        pool: &PgPool,
        filter: &EditionFilter,
        page: PageRequest,
    ) -> Result<Page<EditionListItem>, sqlx::Error> {
        let total = Self::count(pool, filter).await?;
        if total == 0 {
            return Ok(Page::empty(page));
        }

        let items = sqlx::query_as::<_, EditionListItem>(&format!(
            "SELECT e.id, e.work_id, e.isbn, e.format, e.language, e.publisher, e.published_on,
                    e.page_count, e.price_cents, e.currency, e.stock, e.image_url,
                    e.created_at, e.updated_at,
                    w.title AS work_title,
                    ARRAY(
                        SELECT a.name::text FROM work_to_authors wa
                        JOIN authors a ON a.id = wa.author_id
                        WHERE wa.work_id = w.id
                        ORDER BY wa.position ASC
                    ) AS author_names
             FROM book_editions e
             JOIN book_works w ON w.id = e.work_id
             WHERE {EDITION_FILTER_SQL}
             ORDER BY {}
             LIMIT $4 OFFSET $5",
            filter.sort.order_by()
        ))
        .bind(filter.work_id)
        .bind(filter.format)
        .bind(like_pattern(filter.search.as_deref()))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn count(pool: &PgPool, filter: &EditionFilter) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM book_editions e
             JOIN book_works w ON w.id = e.work_id
             WHERE {EDITION_FILTER_SQL}"
        ))
        .bind(filter.work_id)
        .bind(filter.format)
        .bind(like_pattern(filter.search.as_deref()))
        .fetch_one(pool)
        .await
    }

    pub async fn list_for_work(pool: &PgPool, work_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Edition>(&format!(
            "SELECT {EDITION_COLUMNS} FROM book_editions
             WHERE work_id = $1
             ORDER BY published_on DESC NULLS LAST, created_at DESC"
        ))
        .bind(work_id)
        .fetch_all(pool)
        .await
    }

    /// Removes `quantity` copies from stock inside an open transaction
    ///
    /// Digital editions are left untouched.
    ///
    /// # Errors
    ///
    /// `ModelError::Conflict` when fewer than `quantity` copies remain.
    pub async fn decrement_stock(
        conn: &mut PgConnection,
        id: Uuid,
        quantity: i32,
    ) -> Result<(), ModelError> {
        let result = sqlx::query(
            "UPDATE book_editions
             SET stock = stock - $2, updated_at = NOW()
             WHERE id = $1
               AND format IN ('hardcover', 'paperback')
               AND stock >= $2",
        )
        .bind(id)
        .bind(quantity)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let format: Option<EditionFormat> =
            sqlx::query_scalar("SELECT format FROM book_editions WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        match format {
            None => Err(ModelError::NotFound("Edition")),
            Some(format) if format.is_digital() => Ok(()),
            Some(_) => Err(ModelError::Conflict(format!(
                "insufficient stock for edition {}",
                id
            ))),
        }
    }
}
