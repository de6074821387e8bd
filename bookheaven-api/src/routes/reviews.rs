/// Review, rating and like endpoints
///
/// # Endpoints
///
/// - `GET /v1/editions/:id/reviews?page=` - Reviews of an edition (public;
///   each carries `liked` when the caller is signed in)
/// - `GET /v1/editions/:id/rating` - Rating summary (public)
/// - `POST /v1/editions/:id/reviews` - Review an edition, once per user
/// - `PATCH /v1/reviews/:id` - Edit own review
/// - `DELETE /v1/reviews/:id` - Delete own review (admins may delete any)
/// - `POST /v1/reviews/:id/like` - Toggle like

use crate::{
    app::AppState,
    error::ApiResult,
    extract::{ApiQuery, ValidatedJson},
    routes::{clean_text, not_found, nullable},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use bookheaven_shared::{
    auth::{
        authorization::{require_owner, require_owner_or_admin},
        middleware::AuthContext,
    },
    models::{
        edition::Edition,
        review::{CreateReview, LikeState, RatingSummary, Review, UpdateReview},
    },
    pagination::{Page, PageRequest},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;
use validator::Validate;

/// A review as listed, with the caller's like state
#[derive(Debug, Serialize)]
pub struct ReviewView {
    #[serde(flatten)]
    pub review: Review,

    /// Absent for anonymous callers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liked: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateReviewRequest {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i16,

    #[validate(length(max = 200, message = "Title must be at most 200 characters"))]
    pub title: Option<String>,

    #[validate(length(max = 10000, message = "Review must be at most 10000 characters"))]
    pub body: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateReviewRequest {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: Option<i16>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 200, message = "Title must be at most 200 characters"))]
    pub title: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 10000, message = "Review must be at most 10000 characters"))]
    pub body: Option<Option<String>>,
}

fn with_likes(page: Page<Review>, liked: Option<&HashSet<Uuid>>) -> Page<ReviewView> {
    page.map(|review| ReviewView {
        liked: liked.map(|ids| ids.contains(&review.id)),
        review,
    })
}

async fn require_edition(state: &AppState, id: Uuid) -> ApiResult<()> {
    match Edition::find_by_id(&state.db, id).await? {
        Some(_) => Ok(()),
        None => Err(not_found("Edition")),
    }
}

pub async fn list_edition_reviews(
    State(state): State<AppState>,
    Path(edition_id): Path<Uuid>,
    ApiQuery(page): ApiQuery<PageRequest>,
    auth: Option<Extension<AuthContext>>,
) -> ApiResult<Json<Page<ReviewView>>> {
    require_edition(&state, edition_id).await?;

    let reviews = Review::list_for_edition(&state.db, edition_id, page).await?;

    let liked = match auth {
        Some(Extension(auth)) => {
            let ids: Vec<Uuid> = reviews.items.iter().map(|r| r.id).collect();
            Some(Review::liked_by(&state.db, &auth.user_id, &ids).await?)
        }
        None => None,
    };

    Ok(Json(with_likes(reviews, liked.as_ref())))
}

pub async fn get_rating(
    State(state): State<AppState>,
    Path(edition_id): Path<Uuid>,
) -> ApiResult<Json<RatingSummary>> {
    require_edition(&state, edition_id).await?;

    let summary = Review::rating_summary(&state.db, edition_id).await?;
    Ok(Json(summary))
}

/// Review an edition
///
/// # Errors
///
/// - `404 Not Found`: Edition does not exist
/// - `409 Conflict`: The caller already reviewed this edition
/// - `422 Unprocessable Entity`: Validation failed
pub async fn create_review(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(edition_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<CreateReviewRequest>,
) -> ApiResult<(StatusCode, Json<Review>)> {
    let review = Review::create(
        &state.db,
        CreateReview {
            edition_id,
            user_id: auth.user_id.clone(),
            rating: req.rating,
            title: clean_text(req.title),
            body: clean_text(req.body),
        },
    )
    .await?;

    tracing::info!(
        review_id = %review.id,
        edition_id = %edition_id,
        user_id = %auth.user_id,
        rating = review.rating,
        "Review created"
    );

    Ok((StatusCode::CREATED, Json(review)))
}

pub async fn update_review(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateReviewRequest>,
) -> ApiResult<Json<Review>> {
    let review = Review::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| not_found("Review"))?;

    require_owner(&auth, &review.user_id)?;

    let update = UpdateReview {
        rating: req.rating,
        title: req.title.map(clean_text),
        body: req.body.map(clean_text),
    };

    let review = Review::update(&state.db, id, update)
        .await?
        .ok_or_else(|| not_found("Review"))?;

    Ok(Json(review))
}

pub async fn delete_review(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let review = Review::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| not_found("Review"))?;

    require_owner_or_admin(&auth, &review.user_id)?;

    if !Review::delete(&state.db, id).await? {
        return Err(not_found("Review"));
    }

    tracing::info!(review_id = %id, deleted_by = %auth.user_id, "Review deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Like a review, or take the like back
pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LikeState>> {
    let like = Review::toggle_like(&state.db, id, &auth.user_id).await?;
    Ok(Json(like))
}
