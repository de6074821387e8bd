/// Tag model and work tagging
///
/// Tag names are unique case-insensitively (`UNIQUE INDEX ON tags (lower(name))`).
/// Creating a tag whose name already exists in any casing returns the
/// existing tag instead of failing.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE tags (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name VARCHAR(64) NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
///
/// CREATE TABLE work_to_tags (
///     work_id UUID NOT NULL REFERENCES book_works(id) ON DELETE CASCADE,
///     tag_id UUID NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
///     PRIMARY KEY (work_id, tag_id)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{is_foreign_key_violation, is_unique_violation, ModelError};
use crate::pagination::{like_pattern, Page, PageRequest};

pub const MAX_TAG_LENGTH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TagListItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub tag: Tag,
    pub work_count: i64,
}

/// Trims and collapses internal whitespace
///
/// # Errors
///
/// `ModelError::Invalid` for blank names or names over [`MAX_TAG_LENGTH`] characters.
pub fn normalize_tag_name(raw: &str) -> Result<String, ModelError> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    if name.is_empty() {
        return Err(ModelError::Invalid("tag name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_TAG_LENGTH {
        return Err(ModelError::Invalid(format!(
            "tag name must be at most {} characters",
            MAX_TAG_LENGTH
        )));
    }

    Ok(name)
}

impl Tag {
    /// Returns the tag named `raw` (any casing), creating it if needed
    ///
    /// The boolean is `true` when a new row was inserted. A concurrent insert
    /// of the same name is absorbed by `ON CONFLICT DO NOTHING` followed by a
    /// re-read.
    pub async fn find_or_create(pool: &PgPool, raw: &str) -> Result<(Self, bool), ModelError> {
        let name = normalize_tag_name(raw)?;

        if let Some(existing) = Self::find_by_name(pool, &name).await? {
            return Ok((existing, false));
        }

        let inserted = sqlx::query_as::<_, Tag>(
            "INSERT INTO tags (name) VALUES ($1)
             ON CONFLICT DO NOTHING
             RETURNING id, name, created_at",
        )
        .bind(&name)
        .fetch_optional(pool)
        .await?;

        if let Some(tag) = inserted {
            tracing::info!(tag_id = %tag.id, name = %tag.name, "Created tag");
            return Ok((tag, true));
        }

        let existing = Self::find_by_name(pool, &name)
            .await?
            .ok_or(ModelError::NotFound("Tag"))?;
        Ok((existing, false))
    }

    /// Case-insensitive lookup by name
    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Tag>(
            "SELECT id, name, created_at FROM tags WHERE lower(name) = lower($1)",
        )
        .bind(name.trim())
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Tag>("SELECT id, name, created_at FROM tags WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// # Errors
    ///
    /// `ModelError::Conflict` if another tag already has this name.
    pub async fn rename(pool: &PgPool, id: Uuid, raw: &str) -> Result<Option<Self>, ModelError> {
        let name = normalize_tag_name(raw)?;

        sqlx::query_as::<_, Tag>(
            "UPDATE tags SET name = $2 WHERE id = $1 RETURNING id, name, created_at",
        )
        .bind(id)
        .bind(&name)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ModelError::Conflict(format!("a tag named '{}' already exists", name))
            } else {
                ModelError::Database(e)
            }
        })
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists tags alphabetically with the number of works carrying each
    pub async fn list(
        pool: &PgPool,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<TagListItem>, sqlx::Error> {
        let pattern = like_pattern(search);

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tags WHERE ($1::text IS NULL OR name ILIKE $1)")
                .bind(&pattern)
                .fetch_one(pool)
                .await?;

        if total == 0 {
            return Ok(Page::empty(page));
        }

        let items = sqlx::query_as::<_, TagListItem>(
            "SELECT t.id, t.name, t.created_at,
                    (SELECT COUNT(*) FROM work_to_tags wt WHERE wt.tag_id = t.id) AS work_count
             FROM tags t
             WHERE ($1::text IS NULL OR t.name ILIKE $1)
             ORDER BY lower(t.name) ASC
             LIMIT $2 OFFSET $3",
        )
        .bind(&pattern)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(pool)
            .await
    }

    /// Tags a work; tagging twice is a no-op
    pub async fn attach_to_work(pool: &PgPool, work_id: Uuid, tag_id: Uuid) -> Result<(), ModelError> {
        sqlx::query(
            "INSERT INTO work_to_tags (work_id, tag_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(work_id)
        .bind(tag_id)
        .execute(pool)
        .await
        .map_err(|e| {
            if !is_foreign_key_violation(&e) {
                return ModelError::Database(e);
            }
            let on_work = matches!(
                &e,
                sqlx::Error::Database(db) if db.constraint().is_some_and(|c| c.contains("work_id"))
            );
            ModelError::NotFound(if on_work { "Work" } else { "Tag" })
        })?;

        Ok(())
    }

    /// Removes a tag from a work; returns whether a link existed
    pub async fn detach_from_work(
        pool: &PgPool,
        work_id: Uuid,
        tag_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM work_to_tags WHERE work_id = $1 AND tag_id = $2")
            .bind(work_id)
            .bind(tag_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_work(pool: &PgPool, work_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Tag>(
            "SELECT t.id, t.name, t.created_at
             FROM tags t
             JOIN work_to_tags wt ON wt.tag_id = t.id
             WHERE wt.work_id = $1
             ORDER BY lower(t.name) ASC",
        )
        .bind(work_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_tag_name("  Science   Fiction ").unwrap(), "Science Fiction");
    }

    #[test]
    fn test_normalize_rejects_blank() {
        assert!(matches!(normalize_tag_name("   "), Err(ModelError::Invalid(_))));
        assert!(matches!(normalize_tag_name(""), Err(ModelError::Invalid(_))));
    }

    #[test]
    fn test_normalize_rejects_long_names() {
        let long = "x".repeat(MAX_TAG_LENGTH + 1);
        assert!(matches!(normalize_tag_name(&long), Err(ModelError::Invalid(_))));

        let exact = "x".repeat(MAX_TAG_LENGTH);
        assert_eq!(normalize_tag_name(&exact).unwrap(), exact);
    }

    #[test]
    fn test_normalize_preserves_case() {
        assert_eq!(normalize_tag_name("LGBTQ+").unwrap(), "LGBTQ+");
    }
}
