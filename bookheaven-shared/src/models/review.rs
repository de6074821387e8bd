/// Review model: one rating per user per edition, plus likes
///
/// `like_count` is denormalized from `review_likes` and only changes
/// inside [`Review::toggle_like`], which holds a row lock on the review
/// while it adjusts both.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{is_foreign_key_violation, is_unique_violation, ModelError};
use crate::pagination::{Page, PageRequest};

const REVIEW_COLUMNS: &str =
    "id, edition_id, user_id, rating, title, body, like_count, created_at, updated_at";

pub const MIN_RATING: i16 = 1;
pub const MAX_RATING: i16 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Review {
    pub id: Uuid,
    pub edition_id: Uuid,
    pub user_id: String,
    pub rating: i16,
    pub title: Option<String>,
    pub body: Option<String>,
    pub like_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReview {
    pub edition_id: Uuid,
    pub user_id: String,
    pub rating: i16,
    pub title: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateReview {
    pub rating: Option<i16>,
    pub title: Option<Option<String>>,
    pub body: Option<Option<String>>,
}

/// Aggregate ratings for an edition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub count: i64,
    /// `None` until the first review arrives
    pub average: Option<f64>,
    /// Number of reviews per star, index 0 is one star
    pub histogram: [i64; 5],
}

impl RatingSummary {
    /// Builds a summary from `(rating, count)` rows; out-of-range ratings are ignored
    pub fn from_counts(rows: &[(i16, i64)]) -> Self {
        let mut histogram = [0i64; 5];
        for &(rating, count) in rows {
            if (MIN_RATING..=MAX_RATING).contains(&rating) {
                histogram[(rating - MIN_RATING) as usize] += count;
            }
        }

        let count: i64 = histogram.iter().sum();
        let weighted: i64 = histogram
            .iter()
            .enumerate()
            .map(|(i, n)| (i as i64 + 1) * n)
            .sum();

        let average = if count == 0 {
            None
        } else {
            Some((weighted as f64 / count as f64 * 100.0).round() / 100.0)
        };

        Self {
            count,
            average,
            histogram,
        }
    }
}

/// Outcome of liking or unliking a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeState {
    pub liked: bool,
    pub like_count: i32,
}

fn check_rating(rating: i16) -> Result<(), ModelError> {
    if (MIN_RATING..=MAX_RATING).contains(&rating) {
        Ok(())
    } else {
        Err(ModelError::Invalid(format!(
            "rating must be between {} and {}",
            MIN_RATING, MAX_RATING
        )))
    }
}

impl Review {
    /// # Errors
    ///
    /// - `ModelError::Invalid` for a rating outside 1..=5
    /// - `ModelError::NotFound("Edition")` if the edition does not exist
    /// - `ModelError::Conflict` if the user already reviewed this edition
    pub async fn create(pool: &PgPool, data: CreateReview) -> Result<Self, ModelError> {
        check_rating(data.rating)?;

        let review = sqlx::query_as::<_, Review>(&format!(
            "INSERT INTO reviews (edition_id, user_id, rating, title, body)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {REVIEW_COLUMNS}"
        ))
        .bind(data.edition_id)
        .bind(&data.user_id)
        .bind(data.rating)
        .bind(data.title)
        .bind(data.body)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ModelError::Conflict("you have already reviewed this edition".to_string())
            } else if is_foreign_key_violation(&e) {
                ModelError::NotFound("Edition")
            } else {
                ModelError::Database(e)
            }
        })?;

        tracing::info!(
            review_id = %review.id,
            edition_id = %review.edition_id,
            rating = review.rating,
            "Created review"
        );

        Ok(review)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Review>(&format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Applies the present fields; ownership is checked by the caller
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateReview,
    ) -> Result<Option<Self>, ModelError> {
        if let Some(rating) = data.rating {
            check_rating(rating)?;
        }

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE reviews SET updated_at = NOW()");

        if let Some(rating) = data.rating {
            qb.push(", rating = ").push_bind(rating);
        }
        if let Some(title) = data.title {
            qb.push(", title = ").push_bind(title);
        }
        if let Some(body) = data.body {
            qb.push(", body = ").push_bind(body);
        }

        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING ").push(REVIEW_COLUMNS);

        let review = qb.build_query_as::<Review>().fetch_optional(pool).await?;
        Ok(review)
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Newest first
    pub async fn list_for_edition(
        pool: &PgPool,
        edition_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE edition_id = $1")
            .bind(edition_id)
            .fetch_one(pool)
            .await?;

        if total == 0 {
            return Ok(Page::empty(page));
        }

        let items = sqlx::query_as::<_, Review>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews
             WHERE edition_id = $1
             ORDER BY created_at DESC, id ASC
             LIMIT $2 OFFSET $3"
        ))
        .bind(edition_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn list_for_user(
        pool: &PgPool,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await?;

        if total == 0 {
            return Ok(Page::empty(page));
        }

        let items = sqlx::query_as::<_, Review>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews
             WHERE user_id = $1
             ORDER BY created_at DESC, id ASC
             LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn rating_summary(pool: &PgPool, edition_id: Uuid) -> Result<RatingSummary, sqlx::Error> {
        let rows: Vec<(i16, i64)> = sqlx::query_as(
            "SELECT rating, COUNT(*) FROM reviews WHERE edition_id = $1 GROUP BY rating",
        )
        .bind(edition_id)
        .fetch_all(pool)
        .await?;

        Ok(RatingSummary::from_counts(&rows))
    }

    /// Likes the review if `user_id` has not liked it yet, otherwise unlikes it
    ///
    /// # Errors
    ///
    /// `ModelError::NotFound("Review")` if the review does not exist.
    pub async fn toggle_like(
        pool: &PgPool,
        review_id: Uuid,
        user_id: &str,
    ) -> Result<LikeState, ModelError> {
        let mut tx = pool.begin().await?;

        let locked: Option<i32> =
            sqlx::query_scalar("SELECT like_count FROM reviews WHERE id = $1 FOR UPDATE")
                .bind(review_id)
                .fetch_optional(&mut *tx)
                .await?;

        if locked.is_none() {
            return Err(ModelError::NotFound("Review"));
        }

        let removed = sqlx::query("DELETE FROM review_likes WHERE review_id = $1 AND user_id = $2")
            .bind(review_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let (liked, delta) = if removed > 0 {
            (false, -1)
        } else {
            sqlx::query("INSERT INTO review_likes (review_id, user_id) VALUES ($1, $2)")
                .bind(review_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            (true, 1)
        };

        let like_count: i32 = sqlx::query_scalar(
            "UPDATE reviews SET like_count = GREATEST(like_count + $2, 0)
             WHERE id = $1
             RETURNING like_count",
        )
        .bind(review_id)
        .bind(delta)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(review_id = %review_id, liked, like_count, "Toggled review like");

        Ok(LikeState { liked, like_count })
    }

    /// Which of `review_ids` the user has liked
    pub async fn liked_by(
        pool: &PgPool,
        user_id: &str,
        review_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, sqlx::Error> {
        if review_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT review_id FROM review_likes WHERE user_id = $1 AND review_id = ANY($2)",
        )
        .bind(user_id)
        .bind(review_ids)
        .fetch_all(pool)
        .await?;

        Ok(ids.into_iter().collect())
    }
}
