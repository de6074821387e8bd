/// Shelf model: named, user-owned lists of editions
///
/// Shelf names are unique per user, ignoring case. Every user gets the
/// [`DEFAULT_SHELVES`] the first time their shelves are listed, and only then.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::edition::Edition;
use super::{is_foreign_key_violation, is_unique_violation, ModelError};
use crate::pagination::{Page, PageRequest};

const SHELF_COLUMNS: &str = "id, user_id, name, description, is_public, created_at, updated_at";

pub const DEFAULT_SHELVES: [&str; 3] = ["Want to Read", "Currently Reading", "Read"];

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Shelf {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shelf {
    /// Owners see every shelf of theirs; everyone else only public ones
    pub fn is_visible_to(&self, viewer: Option<&str>) -> bool {
        self.is_public || viewer == Some(self.user_id.as_str())
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShelfSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub shelf: Shelf,
    pub item_count: i64,
}

/// An edition on a shelf
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShelfItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub edition: Edition,
    pub work_title: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateShelf {
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateShelf {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub is_public: Option<bool>,
}

fn shelf_name(raw: &str) -> Result<String, ModelError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ModelError::Invalid("shelf name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

fn map_name_conflict(err: sqlx::Error, name: &str) -> ModelError {
    if is_unique_violation(&err) {
        ModelError::Conflict(format!("you already have a shelf named '{}'", name))
    } else {
        ModelError::Database(err)
    }
}

impl Shelf {
    /// # Errors
    ///
    /// `ModelError::Conflict` if the user already has a shelf with this name.
    pub async fn create(pool: &PgPool, data: CreateShelf) -> Result<Self, ModelError> {
        let name = shelf_name(&data.name)?;

        let shelf = sqlx::query_as::<_, Shelf>(&format!(
            "INSERT INTO shelves (user_id, name, description, is_public)
             VALUES ($1, $2, $3, $4)
             RETURNING {SHELF_COLUMNS}"
        ))
        .bind(&data.user_id)
        .bind(&name)
        .bind(data.description)
        .bind(data.is_public)
        .fetch_one(pool)
        .await
        .map_err(|e| map_name_conflict(e, &name))?;

        tracing::info!(shelf_id = %shelf.id, user_id = %shelf.user_id, "Created shelf");

        Ok(shelf)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Shelf>(&format!("SELECT {SHELF_COLUMNS} FROM shelves WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn update(pool: &PgPool, id: Uuid, data: UpdateShelf) -> Result<Option<Self>, ModelError> {
        let name = data.name.as_deref().map(shelf_name).transpose()?;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE shelves SET updated_at = NOW()");

        if let Some(name) = &name {
            qb.push(", name = ").push_bind(name.clone());
        }
        if let Some(description) = data.description {
            qb.push(", description = ").push_bind(description);
        }
        if let Some(is_public) = data.is_public {
            qb.push(", is_public = ").push_bind(is_public);
        }

        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING ").push(SHELF_COLUMNS);

        qb.build_query_as::<Shelf>()
            .fetch_optional(pool)
            .await
            .map_err(|e| map_name_conflict(e, name.as_deref().unwrap_or_default()))
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM shelves WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// The user's shelves, oldest first, optionally only the public ones
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: &str,
        public_only: bool,
    ) -> Result<Vec<ShelfSummary>, sqlx::Error> {
        sqlx::query_as::<_, ShelfSummary>(
            "SELECT s.id, s.user_id, s.name, s.description, s.is_public, s.created_at, s.updated_at,
                    (SELECT COUNT(*) FROM shelf_items si WHERE si.shelf_id = s.id) AS item_count
             FROM shelves s
             WHERE s.user_id = $1 AND (NOT $2 OR s.is_public)
             ORDER BY s.created_at ASC, lower(s.name) ASC",
        )
        .bind(user_id)
        .bind(public_only)
        .fetch_all(pool)
        .await
    }

    /// Creates the default shelves once per user; returns how many were created
    ///
    /// Seeding is recorded, so defaults the user later deletes or renames
    /// stay that way.
    pub async fn ensure_defaults(pool: &PgPool, user_id: &str) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let first_time = sqlx::query(
            "INSERT INTO shelf_defaults_seeded (user_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !first_time {
            tx.rollback().await?;
            return Ok(0);
        }

        let names: Vec<String> = DEFAULT_SHELVES.iter().map(|n| n.to_string()).collect();
        let result = sqlx::query(
            "INSERT INTO shelves (user_id, name)
             SELECT $1, name FROM UNNEST($2::text[]) AS d(name)
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(&names)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected())
    }

    /// Puts an edition on the shelf; returns `false` if it was already there
    ///
    /// # Errors
    ///
    /// `ModelError::NotFound` if the shelf or edition does not exist.
    pub async fn add_edition(pool: &PgPool, shelf_id: Uuid, edition_id: Uuid) -> Result<bool, ModelError> {
        let mut tx = pool.begin().await?;

        let added = sqlx::query(
            "INSERT INTO shelf_items (shelf_id, edition_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(shelf_id)
        .bind(edition_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if !is_foreign_key_violation(&e) {
                return ModelError::Database(e);
            }
            let on_shelf = matches!(
                &e,
                sqlx::Error::Database(db) if db.constraint().is_some_and(|c| c.contains("shelf_id"))
            );
            ModelError::NotFound(if on_shelf { "Shelf" } else { "Edition" })
        })?
        .rows_affected()
            > 0;

        if added {
            sqlx::query("UPDATE shelves SET updated_at = NOW() WHERE id = $1")
                .bind(shelf_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(added)
    }

    /// Returns whether the edition was on the shelf
    pub async fn remove_edition(pool: &PgPool, shelf_id: Uuid, edition_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM shelf_items WHERE shelf_id = $1 AND edition_id = $2")
            .bind(shelf_id)
            .bind(edition_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recently added first
    pub async fn list_items(
        pool: &PgPool,
        shelf_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<ShelfItem>, sqlx::Error> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shelf_items WHERE shelf_id = $1")
            .bind(shelf_id)
            .fetch_one(pool)
            .await?;

        if total == 0 {
            return Ok(Page::empty(page));
        }

        let items = sqlx::query_as::<_, ShelfItem>(
            "SELECT e.id, e.work_id, e.isbn, e.format, e.language, e.publisher, e.published_on,
                    e.page_count, e.price_cents, e.currency, e.stock, e.image_url,
                    e.created_at, e.updated_at,
                    w.title AS work_title, si.added_at
             FROM shelf_items si
             JOIN book_editions e ON e.id = si.edition_id
             JOIN book_works w ON w.id = e.work_id
             WHERE si.shelf_id = $1
             ORDER BY si.added_at DESC, e.id ASC
             LIMIT $2 OFFSET $3",
        )
        .bind(shelf_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(items, total, page))
    }
}
