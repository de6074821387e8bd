/// Shelf endpoints
///
/// Shelves are private unless their owner makes them public. A private
/// shelf answers `404` to everyone but its owner, so its existence does not
/// leak.
///
/// # Endpoints
///
/// - `GET /v1/shelves/:id` - Shelf (public or own)
/// - `GET /v1/shelves/:id/items?page=` - Editions on a shelf (public or own)
/// - `GET /v1/users/:user_id/shelves` - A user's visible shelves
/// - `POST /v1/shelves` - Create shelf
/// - `PATCH /v1/shelves/:id` - Update own shelf
/// - `DELETE /v1/shelves/:id` - Delete own shelf
/// - `PUT /v1/shelves/:id/items/:edition_id` - Add edition to own shelf
/// - `DELETE /v1/shelves/:id/items/:edition_id` - Remove edition from own shelf

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
    auth::{authorization::require_owner, middleware::AuthContext},
    models::shelf::{CreateShelf, Shelf, ShelfItem, ShelfSummary, UpdateShelf},
    pagination::{Page, PageRequest},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateShelfRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,

    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateShelfRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<Option<String>>,

    pub is_public: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ShelfItemChange {
    pub shelf_id: Uuid,
    pub edition_id: Uuid,
    /// `false` when the edition was already on the shelf
    pub added: bool,
}

fn viewer(auth: &Option<Extension<AuthContext>>) -> Option<&str> {
    auth.as_ref().map(|Extension(auth)| auth.user_id.as_str())
}

/// Loads a shelf the viewer may see
async fn visible_shelf(state: &AppState, id: Uuid, viewer: Option<&str>) -> ApiResult<Shelf> {
    Shelf::find_by_id(&state.db, id)
        .await?
        .filter(|shelf| shelf.is_visible_to(viewer))
        .ok_or_else(|| not_found("Shelf"))
}

/// Loads a shelf the caller owns
///
/// Someone else's private shelf is reported missing rather than forbidden.
async fn owned_shelf(state: &AppState, id: Uuid, auth: &AuthContext) -> ApiResult<Shelf> {
    let shelf = visible_shelf(state, id, Some(&auth.user_id)).await?;
    require_owner(auth, &shelf.user_id)?;
    Ok(shelf)
}

pub async fn get_shelf(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth: Option<Extension<AuthContext>>,
) -> ApiResult<Json<Shelf>> {
    let shelf = visible_shelf(&state, id, viewer(&auth)).await?;
    Ok(Json(shelf))
}

pub async fn list_shelf_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ApiQuery(page): ApiQuery<PageRequest>,
    auth: Option<Extension<AuthContext>>,
) -> ApiResult<Json<Page<ShelfItem>>> {
    let shelf = visible_shelf(&state, id, viewer(&auth)).await?;
    let items = Shelf::list_items(&state.db, shelf.id, page).await?;
    Ok(Json(items))
}

/// A user's shelves; others only see the public ones
pub async fn list_user_shelves(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    auth: Option<Extension<AuthContext>>,
) -> ApiResult<Json<Vec<ShelfSummary>>> {
    let public_only = viewer(&auth) != Some(user_id.as_str());
    let shelves = Shelf::list_for_user(&state.db, &user_id, public_only).await?;
    Ok(Json(shelves))
}

/// Create shelf
///
/// # Errors
///
/// - `409 Conflict`: The caller already has a shelf with this name (any case)
/// - `422 Unprocessable Entity`: Validation failed
pub async fn create_shelf(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidatedJson(req): ValidatedJson<CreateShelfRequest>,
) -> ApiResult<(StatusCode, Json<Shelf>)> {
    let shelf = Shelf::create(
        &state.db,
        CreateShelf {
            user_id: auth.user_id.clone(),
            name: req.name.trim().to_string(),
            description: clean_text(req.description),
            is_public: req.is_public,
        },
    )
    .await?;

    tracing::info!(shelf_id = %shelf.id, user_id = %auth.user_id, "Shelf created");

    Ok((StatusCode::CREATED, Json(shelf)))
}

pub async fn update_shelf(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateShelfRequest>,
) -> ApiResult<Json<Shelf>> {
    owned_shelf(&state, id, &auth).await?;

    let update = UpdateShelf {
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description.map(clean_text),
        is_public: req.is_public,
    };

    let shelf = Shelf::update(&state.db, id, update)
        .await?
        .ok_or_else(|| not_found("Shelf"))?;

    Ok(Json(shelf))
}

pub async fn delete_shelf(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    owned_shelf(&state, id, &auth).await?;

    if !Shelf::delete(&state.db, id).await? {
        return Err(not_found("Shelf"));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Add edition to shelf
///
/// Idempotent: `201 Created` when added, `200 OK` when it was already there.
pub async fn add_shelf_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((shelf_id, edition_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<(StatusCode, Json<ShelfItemChange>)> {
    owned_shelf(&state, shelf_id, &auth).await?;

    let added = Shelf::add_edition(&state.db, shelf_id, edition_id).await?;
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };

    Ok((
        status,
        Json(ShelfItemChange {
            shelf_id,
            edition_id,
            added,
        }),
    ))
}

pub async fn remove_shelf_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((shelf_id, edition_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    owned_shelf(&state, shelf_id, &auth).await?;

    if !Shelf::remove_edition(&state.db, shelf_id, edition_id).await? {
        return Err(not_found("Edition on shelf"));
    }

    Ok(StatusCode::NO_CONTENT)
}
