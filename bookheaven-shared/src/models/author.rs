/// Author model and database operations
///
/// # Schema
///
/// ```sql
/// CREATE TABLE authors (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name VARCHAR(255) NOT NULL,
///     bio TEXT,
///     birth_date DATE,
///     death_date DATE,
///     image_url VARCHAR(1024),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// `image_url` is denormalized from `author_images` and only written by the
/// image swap in [`crate::models::image`].
///
/// # Example
///
/// ```no_run
/// use bookheaven_shared::models::author::{Author, CreateAuthor};
/// use bookheaven_shared::pagination::PageRequest;
/// # use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let author = Author::create(&pool, CreateAuthor {
///     name: "Ursula K. Le Guin".to_string(),
///     bio: None,
///     birth_date: None,
///     death_date: None,
/// }).await?;
///
/// let page = Author::search(&pool, Some("le guin"), PageRequest::default()).await?;
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::pagination::{like_pattern, Page, PageRequest};

const AUTHOR_COLUMNS: &str =
    "id, name, bio, birth_date, death_date, image_url, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Author {
    pub id: Uuid,
    pub name: String,
    pub bio: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub death_date: Option<NaiveDate>,
    /// Current portrait URL (mirrors the single row in `author_images`)
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuthor {
    pub name: String,
    pub bio: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub death_date: Option<NaiveDate>,
}

/// Partial update; `Some(None)` clears a nullable column
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAuthor {
    pub name: Option<String>,
    pub bio: Option<Option<String>>,
    pub birth_date: Option<Option<NaiveDate>>,
    pub death_date: Option<Option<NaiveDate>>,
}

impl UpdateAuthor {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.bio.is_none()
            && self.birth_date.is_none()
            && self.death_date.is_none()
    }
}

impl Author {
    pub async fn create(pool: &PgPool, data: CreateAuthor) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Author>(&format!(
            "INSERT INTO authors (name, bio, birth_date, death_date)
             VALUES ($1, $2, $3, $4)
             RETURNING {AUTHOR_COLUMNS}"
        ))
        .bind(data.name)
        .bind(data.bio)
        .bind(data.birth_date)
        .bind(data.death_date)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Author>(&format!(
            "SELECT {AUTHOR_COLUMNS} FROM authors WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Updates the fields present in `data`
    ///
    /// Returns `None` if the author does not exist.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateAuthor,
    ) -> Result<Option<Self>, sqlx::Error> {
        if data.is_empty() {
            return Self::find_by_id(pool, id).await;
        }

        let mut query = String::from("UPDATE authors SET updated_at = NOW()");
        let mut bind_count = 1;

        if data.name.is_some() {
            bind_count += 1;
            query.push_str(&format!(", name = ${}", bind_count));
        }
        if data.bio.is_some() {
            bind_count += 1;
            query.push_str(&format!(", bio = ${}", bind_count));
        }
        if data.birth_date.is_some() {
            bind_count += 1;
            query.push_str(&format!(", birth_date = ${}", bind_count));
        }
        if data.death_date.is_some() {
            bind_count += 1;
            query.push_str(&format!(", death_date = ${}", bind_count));
        }

        query.push_str(&format!(" WHERE id = $1 RETURNING {AUTHOR_COLUMNS}"));

        let mut q = sqlx::query_as::<_, Author>(&query).bind(id);

        if let Some(name) = data.name {
            q = q.bind(name);
        }
        if let Some(bio) = data.bio {
            q = q.bind(bio);
        }
        if let Some(birth_date) = data.birth_date {
            q = q.bind(birth_date);
        }
        if let Some(death_date) = data.death_date {
            q = q.bind(death_date);
        }

        q.fetch_optional(pool).await
    }

    /// Deletes an author; links to works and images cascade
    ///
    /// Returns the file keys of the author's images so the caller can
    /// remove them from blob storage.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<Option<Vec<String>>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let keys: Vec<String> =
            sqlx::query_scalar("SELECT file_key FROM author_images WHERE author_id = $1")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        let result = sqlx::query("DELETE FROM authors WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(keys))
    }

    /// Lists authors alphabetically
    pub async fn list(pool: &PgPool, page: PageRequest) -> Result<Page<Self>, sqlx::Error> {
        Self::search(pool, None, page).await
    }

    /// Case-insensitive substring search on the author name
    pub async fn search(
        pool: &PgPool,
        query: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let pattern = like_pattern(query);

        let total = Self::count_matching(pool, pattern.as_deref()).await?;
        if total == 0 {
            return Ok(Page::empty(page));
        }

        let authors = sqlx::query_as::<_, Author>(&format!(
            "SELECT {AUTHOR_COLUMNS} FROM authors
             WHERE ($1::text IS NULL OR name ILIKE $1)
             ORDER BY lower(name) ASC, id ASC
             LIMIT $2 OFFSET $3"
        ))
        .bind(pattern)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(authors, total, page))
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        Self::count_matching(pool, None).await
    }

    async fn count_matching(pool: &PgPool, pattern: Option<&str>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM authors WHERE ($1::text IS NULL OR name ILIKE $1)")
            .bind(pattern)
            .fetch_one(pool)
            .await
    }

    /// Authors of a work in credited order
    pub async fn list_for_work(pool: &PgPool, work_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Author>(
            "SELECT a.id, a.name, a.bio, a.birth_date, a.death_date, a.image_url,
                    a.created_at, a.updated_at
             FROM authors a
             JOIN work_to_authors wa ON wa.author_id = a.id
             WHERE wa.work_id = $1
             ORDER BY wa.position ASC, lower(a.name) ASC",
        )
        .bind(work_id)
        .fetch_all(pool)
        .await
    }

    /// Returns the ids in `ids` that do not exist
    pub async fn missing_ids(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT requested.id FROM UNNEST($1::uuid[]) AS requested(id)
             WHERE NOT EXISTS (SELECT 1 FROM authors a WHERE a.id = requested.id)",
        )
        .bind(ids)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_author_default_is_empty() {
        assert!(UpdateAuthor::default().is_empty());
    }

    #[test]
    fn test_clearing_a_field_is_not_empty() {
        let update = UpdateAuthor {
            bio: Some(None),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
