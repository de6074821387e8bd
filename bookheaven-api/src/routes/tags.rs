/// Tag endpoints
///
/// Tag names are unique regardless of case. Creating a tag that already
/// exists under another capitalisation returns the existing tag.
///
/// # Endpoints
///
/// - `GET /v1/tags?q=&page=` - List tags with work counts (public)
/// - `POST /v1/tags` - Find or create tag (admin)
/// - `PATCH /v1/tags/:id` - Rename tag (admin)
/// - `DELETE /v1/tags/:id` - Delete tag (admin)
/// - `PUT /v1/works/:id/tags/:tag_id` - Tag a work (admin)
/// - `DELETE /v1/works/:id/tags/:tag_id` - Untag a work (admin)

use crate::{
    app::AppState,
    error::ApiResult,
    extract::{ApiQuery, ValidatedJson},
    routes::not_found,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use bookheaven_shared::{
    models::tag::{Tag, TagListItem},
    pagination::{Page, PageRequest},
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
pub struct TagQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TagRequest {
    #[validate(length(min = 1, max = 64, message = "Name must be 1-64 characters"))]
    pub name: String,
}

pub async fn list_tags(
    State(state): State<AppState>,
    ApiQuery(page): ApiQuery<PageRequest>,
    ApiQuery(query): ApiQuery<TagQuery>,
) -> ApiResult<Json<Page<TagListItem>>> {
    let tags = Tag::list(&state.db, query.q.as_deref(), page).await?;
    Ok(Json(tags))
}

/// Find or create tag (admin)
///
/// # Response
///
/// - `201 Created` with the new tag
/// - `200 OK` with the existing tag when the name matches case-insensitively
pub async fn create_tag(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<TagRequest>,
) -> ApiResult<(StatusCode, Json<Tag>)> {
    let (tag, created) = Tag::find_or_create(&state.db, &req.name).await?;

    let status = if created {
        tracing::info!(tag_id = %tag.id, name = %tag.name, "Tag created");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(tag)))
}

pub async fn rename_tag(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<TagRequest>,
) -> ApiResult<Json<Tag>> {
    let tag = Tag::rename(&state.db, id, &req.name)
        .await?
        .ok_or_else(|| not_found("Tag"))?;

    Ok(Json(tag))
}

pub async fn delete_tag(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !Tag::delete(&state.db, id).await? {
        return Err(not_found("Tag"));
    }

    tracing::info!(tag_id = %id, "Tag deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Tag a work (admin); tagging twice is harmless
pub async fn attach_tag(
    State(state): State<AppState>,
    Path((work_id, tag_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    Tag::attach_to_work(&state.db, work_id, tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn detach_tag(
    State(state): State<AppState>,
    Path((work_id, tag_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    if !Tag::detach_from_work(&state.db, work_id, tag_id).await? {
        return Err(not_found("Tag on work"));
    }
    Ok(StatusCode::NO_CONTENT)
}
