/// Edition and author images
///
/// Image files live in the blob store; these tables hold their keys and
/// public URLs. Each owner row (`book_editions`, `authors`) also carries a
/// denormalized `image_url` so listings never join the image tables.
///
/// # Swap protocol
///
/// [`Image::replace`] runs in one transaction:
///
/// 1. lock the owner row (`FOR UPDATE`), failing with `NotFound` if absent
/// 2. delete the owner's existing image rows, collecting their file keys
/// 3. insert the new image row
/// 4. point the owner's `image_url` at the new URL
///
/// After commit the caller removes the collected keys from the blob store
/// (see [`crate::storage::cleanup_after_commit`]). If anything fails before
/// commit nothing changes and no blob is touched.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE book_images (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     edition_id UUID NOT NULL REFERENCES book_editions(id) ON DELETE CASCADE,
///     file_key VARCHAR(255) NOT NULL UNIQUE,
///     url VARCHAR(1024) NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// -- author_images is identical with author_id -> authors(id)
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{is_unique_violation, ModelError};

/// Which table family an image belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOwner {
    Edition,
    Author,
}

impl ImageOwner {
    fn image_table(&self) -> &'static str {
        match self {
            ImageOwner::Edition => "book_images",
            ImageOwner::Author => "author_images",
        }
    }

    fn owner_column(&self) -> &'static str {
        match self {
            ImageOwner::Edition => "edition_id",
            ImageOwner::Author => "author_id",
        }
    }

    fn owner_table(&self) -> &'static str {
        match self {
            ImageOwner::Edition => "book_editions",
            ImageOwner::Author => "authors",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ImageOwner::Edition => "Edition",
            ImageOwner::Author => "Author",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Image {
    pub id: Uuid,
    /// Edition or author id, depending on the table
    pub owner_id: Uuid,
    /// Blob store key, used for deletion
    pub file_key: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// An uploaded file to attach
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewImage {
    pub file_key: String,
    pub url: String,
}

/// Result of a committed swap
#[derive(Debug, Clone)]
pub struct ImageSwap {
    pub image: Image,
    /// Blob keys no longer referenced by any row
    pub removed_keys: Vec<String>,
}

impl Image {
    /// Replaces the owner's image atomically; see the module docs
    ///
    /// # Errors
    ///
    /// - `ModelError::NotFound` if the owner row does not exist
    /// - `ModelError::Conflict` if `file_key` is already attached elsewhere
    pub async fn replace(
        pool: &PgPool,
        owner: ImageOwner,
        owner_id: Uuid,
        new_image: NewImage,
    ) -> Result<ImageSwap, ModelError> {
        let mut tx = pool.begin().await?;

        let locked: Option<Uuid> = sqlx::query_scalar(&format!(
            "SELECT id FROM {} WHERE id = $1 FOR UPDATE",
            owner.owner_table()
        ))
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            tx.rollback().await?;
            return Err(ModelError::NotFound(owner.label()));
        }

        let previous_keys: Vec<String> = sqlx::query_scalar(&format!(
            "DELETE FROM {} WHERE {} = $1 RETURNING file_key",
            owner.image_table(),
            owner.owner_column()
        ))
        .bind(owner_id)
        .fetch_all(&mut *tx)
        .await?;

        let image = sqlx::query_as::<_, Image>(&format!(
            "INSERT INTO {table} ({column}, file_key, url)
             VALUES ($1, $2, $3)
             RETURNING id, {column} AS owner_id, file_key, url, created_at",
            table = owner.image_table(),
            column = owner.owner_column()
        ))
        .bind(owner_id)
        .bind(&new_image.file_key)
        .bind(&new_image.url)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ModelError::Conflict(format!(
                    "file {} is already attached to another record",
                    new_image.file_key
                ))
            } else {
                ModelError::Database(e)
            }
        })?;

        sqlx::query(&format!(
            "UPDATE {} SET image_url = $2, updated_at = NOW() WHERE id = $1",
            owner.owner_table()
        ))
        .bind(owner_id)
        .bind(&image.url)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let removed_keys = unreferenced_keys(previous_keys, &image.file_key);

        tracing::info!(
            owner = owner.label(),
            owner_id = %owner_id,
            image_id = %image.id,
            removed = removed_keys.len(),
            "Replaced image"
        );

        Ok(ImageSwap {
            image,
            removed_keys,
        })
    }

    /// Detaches every image from the owner and clears its `image_url`
    ///
    /// Returns the removed blob keys, or `None` if the owner does not exist.
    pub async fn remove_all(
        pool: &PgPool,
        owner: ImageOwner,
        owner_id: Uuid,
    ) -> Result<Option<Vec<String>>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let updated = sqlx::query(&format!(
            "UPDATE {} SET image_url = NULL, updated_at = NOW() WHERE id = $1",
            owner.owner_table()
        ))
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let keys: Vec<String> = sqlx::query_scalar(&format!(
            "DELETE FROM {} WHERE {} = $1 RETURNING file_key",
            owner.image_table(),
            owner.owner_column()
        ))
        .bind(owner_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(keys))
    }

    pub async fn list(
        pool: &PgPool,
        owner: ImageOwner,
        owner_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Image>(&format!(
            "SELECT id, {column} AS owner_id, file_key, url, created_at
             FROM {table}
             WHERE {column} = $1
             ORDER BY created_at DESC",
            table = owner.image_table(),
            column = owner.owner_column()
        ))
        .bind(owner_id)
        .fetch_all(pool)
        .await
    }

    pub async fn replace_for_edition(
        pool: &PgPool,
        edition_id: Uuid,
        new_image: NewImage,
    ) -> Result<ImageSwap, ModelError> {
        Self::replace(pool, ImageOwner::Edition, edition_id, new_image).await
    }

    pub async fn replace_for_author(
        pool: &PgPool,
        author_id: Uuid,
        new_image: NewImage,
    ) -> Result<ImageSwap, ModelError> {
        Self::replace(pool, ImageOwner::Author, author_id, new_image).await
    }

    pub async fn remove_for_edition(
        pool: &PgPool,
        edition_id: Uuid,
    ) -> Result<Option<Vec<String>>, sqlx::Error> {
        Self::remove_all(pool, ImageOwner::Edition, edition_id).await
    }

    pub async fn remove_for_author(
        pool: &PgPool,
        author_id: Uuid,
    ) -> Result<Option<Vec<String>>, sqlx::Error> {
        Self::remove_all(pool, ImageOwner::Author, author_id).await
    }

    pub async fn list_for_edition(pool: &PgPool, edition_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        Self::list(pool, ImageOwner::Edition, edition_id).await
    }

    pub async fn list_for_author(pool: &PgPool, author_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        Self::list(pool, ImageOwner::Author, author_id).await
    }
}

/// Drops the key that was re-attached, so it is never scheduled for deletion
fn unreferenced_keys(previous: Vec<String>, attached: &str) -> Vec<String> {
    previous.into_iter().filter(|key| key != attached).collect()
}
