/// Edition and author image endpoints
///
/// Files are uploaded straight to blob storage by the client; these
/// endpoints only record the uploaded file. Replacing or removing an image
/// swaps the database rows in one transaction and deletes the superseded
/// files from storage after the commit.
///
/// # Endpoints
///
/// - `GET /v1/editions/:id/images` - List edition images (public)
/// - `PUT /v1/editions/:id/image` - Replace edition image (admin)
/// - `DELETE /v1/editions/:id/image` - Remove edition image (admin)
/// - `PUT /v1/authors/:id/image` - Replace author image (admin)
/// - `DELETE /v1/authors/:id/image` - Remove author image (admin)

use crate::{
    app::AppState,
    error::ApiResult,
    extract::ValidatedJson,
    routes::not_found,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use bookheaven_shared::{
    models::{
        edition::Edition,
        image::{Image, ImageSwap, NewImage},
    },
    storage::cleanup_after_commit,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// An uploaded file to attach
#[derive(Debug, Deserialize, Validate)]
pub struct ImageRequest {
    /// Storage key returned by the upload
    #[validate(length(min = 1, max = 255, message = "File key must be 1-255 characters"))]
    pub file_key: String,

    #[validate(url(message = "URL is not valid"), length(max = 1024, message = "URL must be at most 1024 characters"))]
    pub url: String,
}

impl From<ImageRequest> for NewImage {
    fn from(req: ImageRequest) -> Self {
        NewImage {
            file_key: req.file_key.trim().to_string(),
            url: req.url,
        }
    }
}

pub async fn list_edition_images(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Image>>> {
    if Edition::find_by_id(&state.db, id).await?.is_none() {
        return Err(not_found("Edition"));
    }

    let images = Image::list_for_edition(&state.db, id).await?;
    Ok(Json(images))
}

async fn finish_swap(state: &AppState, swap: ImageSwap) -> Json<Image> {
    cleanup_after_commit(state.blob_store.as_ref(), &state.db, &swap.removed_keys).await;

    tracing::info!(
        image_id = %swap.image.id,
        owner_id = %swap.image.owner_id,
        replaced = swap.removed_keys.len(),
        "Image replaced"
    );

    Json(swap.image)
}

async fn finish_removal(
    state: &AppState,
    owner_id: Uuid,
    keys: Option<Vec<String>>,
    owner: &str,
) -> ApiResult<StatusCode> {
    let keys = keys.ok_or_else(|| not_found(owner))?;

    cleanup_after_commit(state.blob_store.as_ref(), &state.db, &keys).await;

    tracing::info!(owner_id = %owner_id, removed = keys.len(), "Images removed");

    Ok(StatusCode::NO_CONTENT)
}

/// Replace edition image (admin)
///
/// # Request
///
/// ```json
/// { "file_key": "f81d4fae-cover.jpg", "url": "https://utfs.io/f/f81d4fae-cover.jpg" }
/// ```
///
/// # Errors
///
/// - `404 Not Found`: Edition does not exist (nothing is changed)
/// - `422 Unprocessable Entity`: Validation failed
pub async fn replace_edition_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ImageRequest>,
) -> ApiResult<Json<Image>> {
    let swap = Image::replace_for_edition(&state.db, id, req.into()).await?;
    Ok(finish_swap(&state, swap).await)
}

pub async fn remove_edition_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let keys = Image::remove_for_edition(&state.db, id).await?;
    finish_removal(&state, id, keys, "Edition").await
}

pub async fn replace_author_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ImageRequest>,
) -> ApiResult<Json<Image>> {
    let swap = Image::replace_for_author(&state.db, id, req.into()).await?;
    Ok(finish_swap(&state, swap).await)
}

pub async fn remove_author_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let keys = Image::remove_for_author(&state.db, id).await?;
    finish_removal(&state, id, keys, "Author").await
}
