/// Book work model: the abstract title, independent of any edition
///
/// # Schema
///
/// ```sql
/// CREATE TABLE book_works (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     title VARCHAR(512) NOT NULL,
///     description TEXT,
///     original_language VARCHAR(16),
///     first_published_year INTEGER,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
///
/// CREATE TABLE work_to_authors (
///     work_id UUID NOT NULL REFERENCES book_works(id) ON DELETE CASCADE,
///     author_id UUID NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
///     position INTEGER NOT NULL DEFAULT 0,
///     PRIMARY KEY (work_id, author_id)
/// );
/// ```
///
/// Author links are written in the same transaction as the work itself, so a
/// work never exists with a partially applied author list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{
    author::Author, edition::Edition, is_foreign_key_violation, tag::Tag, ModelError,
};
use crate::pagination::{like_pattern, Page, PageRequest};

const WORK_COLUMNS: &str =
    "id, title, description, original_language, first_published_year, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Work {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub original_language: Option<String>,
    pub first_published_year: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row returned by work listings
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkListItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub work: Work,

    /// Author names in credited order
    pub author_names: Vec<String>,

    pub edition_count: i64,

    /// Cheapest edition price, if any edition exists
    pub min_price_cents: Option<i64>,
}

/// A work with everything a detail page shows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkDetail {
    #[serde(flatten)]
    pub work: Work,
    pub authors: Vec<Author>,
    pub tags: Vec<Tag>,
    pub editions: Vec<Edition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWork {
    pub title: String,
    pub description: Option<String>,
    pub original_language: Option<String>,
    pub first_published_year: Option<i32>,
    /// Credited authors, in order
    pub author_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateWork {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub original_language: Option<Option<String>>,
    pub first_published_year: Option<Option<i32>>,
    /// Replaces the whole author list when present
    pub author_ids: Option<Vec<Uuid>>,
}

/// Filters for [`Work::list`]
#[derive(Debug, Clone, Default)]
pub struct WorkFilter {
    /// Matches title or any author name
    pub search: Option<String>,
    pub tag_id: Option<Uuid>,
    pub author_id: Option<Uuid>,
}

const WORK_FILTER_SQL: &str = "
    ($1::text IS NULL
        OR w.title ILIKE $1
        OR EXISTS (
            SELECT 1 FROM work_to_authors wa
            JOIN authors a ON a.id = wa.author_id
            WHERE wa.work_id = w.id AND a.name ILIKE $1))
    AND ($2::uuid IS NULL
        OR EXISTS (SELECT 1 FROM work_to_tags wt WHERE wt.work_id = w.id AND wt.tag_id = $2))
    AND ($3::uuid IS NULL
        OR EXISTS (SELECT 1 FROM work_to_authors wa WHERE wa.work_id = w.id AND wa.author_id = $3))";

/// Removes repeated ids, keeping the first occurrence
pub(crate) fn dedup_preserving_order(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

impl Work {
    /// Inserts a work and its author links atomically
    ///
    /// # Errors
    ///
    /// `ModelError::NotFound("Author")` if any author id does not exist.
    pub async fn create(pool: &PgPool, data: CreateWork) -> Result<Self, ModelError> {
        let mut tx = pool.begin().await?;

        let work = sqlx::query_as::<_, Work>(&format!(
            "INSERT INTO book_works (title, description, original_language, first_published_year)
             VALUES ($1, $2, $3, $4)
             RETURNING {WORK_COLUMNS}"
        ))
        .bind(data.title)
        .bind(data.description)
        .bind(data.original_language)
        .bind(data.first_published_year)
        .fetch_one(&mut *tx)
        .await?;

        set_authors(&mut tx, work.id, &data.author_ids).await?;

        tx.commit().await?;

        tracing::info!(work_id = %work.id, "Created work");
        Ok(work)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Work>(&format!(
            "SELECT {WORK_COLUMNS} FROM book_works WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Loads a work together with its authors, tags and editions
    pub async fn find_detail(pool: &PgPool, id: Uuid) -> Result<Option<WorkDetail>, sqlx::Error> {
        let Some(work) = Self::find_by_id(pool, id).await? else {
            return Ok(None);
        };

        let (authors, tags, editions) = futures::try_join!(
            Author::list_for_work(pool, id),
            Tag::list_for_work(pool, id),
            Edition::list_for_work(pool, id),
        )?;

        Ok(Some(WorkDetail {
            work,
            authors,
            tags,
            editions,
        }))
    }

    /// Applies a partial update; replaces the author list when given
    ///
    /// Returns `Ok(None)` if the work does not exist.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateWork,
    ) -> Result<Option<Self>, ModelError> {
        let mut tx = pool.begin().await?;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE book_works SET updated_at = NOW()");

        if let Some(title) = data.title {
            qb.push(", title = ").push_bind(title);
        }
        if let Some(description) = data.description {
            qb.push(", description = ").push_bind(description);
        }
        if let Some(language) = data.original_language {
            qb.push(", original_language = ").push_bind(language);
        }
        if let Some(year) = data.first_published_year {
            qb.push(", first_published_year = ").push_bind(year);
        }
        qb.push(" WHERE id = ")
            .push_bind(id)
            .push(format!(" RETURNING {WORK_COLUMNS}"));

        let Some(work) = qb.build_query_as::<Work>().fetch_optional(&mut *tx).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        if let Some(author_ids) = data.author_ids {
            sqlx::query("DELETE FROM work_to_authors WHERE work_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            set_authors(&mut tx, id, &author_ids).await?;
        }

        tx.commit().await?;
        Ok(Some(work))
    }

    /// Deletes a work and, by cascade, its editions
    ///
    /// Returns the blob keys of every deleted edition image, or `None` if the
    /// work did not exist.
    ///
    /// # Errors
    ///
    /// `ModelError::Conflict` if any edition has been ordered.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<Option<Vec<String>>, ModelError> {
        let mut tx = pool.begin().await?;

        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT bi.file_key FROM book_images bi
             JOIN book_editions e ON e.id = bi.edition_id
             WHERE e.work_id = $1",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM book_works WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    ModelError::Conflict("work has editions referenced by orders".to_string())
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

    /// Lists works, newest first, with author names and price range
    pub async fn list(
        pool: &PgPool,
        filter: &WorkFilter,
        page: PageRequest,
    ) -> Result<Page<WorkListItem>, sqlx::Error> {
        let pattern = like_pattern(filter.search.as_deref());

        let total = Self::count(pool, filter).await?;
        if total == 0 {
            return Ok(Page::empty(page));
        }

        let items = sqlx::query_as::<_, WorkListItem>(&format!(
            "SELECT w.id, w.title, w.description, w.original_language, w.first_published_year,
                    w.created_at, w.updated_at,
                    ARRAY(
                        SELECT a.name::text FROM work_to_authors wa
                        JOIN authors a ON a.id = wa.author_id
                        WHERE wa.work_id = w.id
                        ORDER BY wa.position ASC
                    ) AS author_names,
                    (SELECT COUNT(*) FROM book_editions e WHERE e.work_id = w.id) AS edition_count,
                    (SELECT MIN(e.price_cents) FROM book_editions e WHERE e.work_id = w.id)
                        AS min_price_cents
             FROM book_works w
             WHERE {WORK_FILTER_SQL}
             ORDER BY w.created_at DESC, w.id ASC
             LIMIT $4 OFFSET $5"
        ))
        .bind(pattern)
        .bind(filter.tag_id)
        .bind(filter.author_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn count(pool: &PgPool, filter: &WorkFilter) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM book_works w WHERE {WORK_FILTER_SQL}"
        ))
        .bind(like_pattern(filter.search.as_deref()))
        .bind(filter.tag_id)
        .bind(filter.author_id)
        .fetch_one(pool)
        .await
    }

    /// Works credited to an author, newest first
    pub async fn list_for_author(pool: &PgPool, author_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Work>(
            "SELECT w.id, w.title, w.description, w.original_language, w.first_published_year,
                    w.created_at, w.updated_at
             FROM book_works w
             JOIN work_to_authors wa ON wa.work_id = w.id
             WHERE wa.author_id = $1
             ORDER BY w.first_published_year DESC NULLS LAST, w.created_at DESC",
        )
        .bind(author_id)
        .fetch_all(pool)
        .await
    }
}

/// Writes author links for a work inside `tx`
async fn set_authors(
    tx: &mut Transaction<'_, Postgres>,
    work_id: Uuid,
    author_ids: &[Uuid],
) -> Result<(), ModelError> {
    let author_ids = dedup_preserving_order(author_ids);
    if author_ids.is_empty() {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO work_to_authors (work_id, author_id, position)
         SELECT $1, linked.id, (linked.ord - 1)::int
         FROM UNNEST($2::uuid[]) WITH ORDINALITY AS linked(id, ord)",
    )
    .bind(work_id)
    .bind(&author_ids)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            ModelError::NotFound("Author")
        } else {
            ModelError::Database(e)
        }
    })?;

    Ok(())
}
