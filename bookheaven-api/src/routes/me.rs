/// The signed-in user's profile and collections
///
/// # Endpoints
///
/// - `GET /v1/me` - Profile from the identity provider plus the session role
/// - `GET /v1/me/shelves` - Own shelves; default shelves are created on first use
/// - `GET /v1/me/reviews?page=` - Own reviews
/// - `GET /v1/me/orders?page=` - Own orders

use crate::{app::AppState, error::ApiResult, extract::ApiQuery};
use axum::{extract::State, Extension, Json};
use bookheaven_shared::{
    auth::middleware::{AuthContext, Role},
    identity::IdentityUser,
    models::{order::Order, review::Review, shelf::{Shelf, ShelfSummary}},
    pagination::{Page, PageRequest},
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: String,

    /// Role carried by the session token; this is what authorization uses
    pub role: Role,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// `None` when no identity provider is configured
    pub profile: Option<IdentityUser>,
}

pub async fn get_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<MeResponse>> {
    let profile = match &state.identity {
        Some(identity) => Some(identity.get_user(&auth.user_id).await?),
        None => None,
    };

    Ok(Json(MeResponse {
        user_id: auth.user_id,
        role: auth.role,
        session_id: auth.session_id,
        profile,
    }))
}

pub async fn my_shelves(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<ShelfSummary>>> {
    let created = Shelf::ensure_defaults(&state.db, &auth.user_id).await?;
    if created > 0 {
        tracing::debug!(user_id = %auth.user_id, created, "Created default shelves");
    }

    let shelves = Shelf::list_for_user(&state.db, &auth.user_id, false).await?;
    Ok(Json(shelves))
}

pub async fn my_reviews(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiQuery(page): ApiQuery<PageRequest>,
) -> ApiResult<Json<Page<Review>>> {
    let reviews = Review::list_for_user(&state.db, &auth.user_id, page).await?;
    Ok(Json(reviews))
}

pub async fn my_orders(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiQuery(page): ApiQuery<PageRequest>,
) -> ApiResult<Json<Page<Order>>> {
    let orders = Order::list_for_user(&state.db, &auth.user_id, page).await?;
    Ok(Json(orders))
}
