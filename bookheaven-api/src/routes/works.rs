/// Book work endpoints
///
/// # Endpoints
///
/// - `GET /v1/works?q=&tag=&author=&page=` - List works (public)
/// - `GET /v1/works/:id` - Work with authors, tags and editions (public)
/// - `POST /v1/works` - Create work (admin)
/// - `PATCH /v1/works/:id` - Update work, optionally replacing its authors (admin)
/// - `DELETE /v1/works/:id` - Delete work and its editions (admin)

use crate::{
    app::AppState,
    error::ApiResult,
    extract::{ApiQuery, ValidatedJson},
    routes::{clean_text, not_found, nullable},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use bookheaven_shared::{
    models::work::{CreateWork, UpdateWork, Work, WorkDetail, WorkFilter, WorkListItem},
    pagination::{Page, PageRequest},
    storage::cleanup_after_commit,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
pub struct WorkQuery {
    /// Matches the title or an author's name
    pub q: Option<String>,
    pub tag: Option<Uuid>,
    pub author: Option<Uuid>,
}

impl From<WorkQuery> for WorkFilter {
    fn from(query: WorkQuery) -> Self {
        WorkFilter {
            search: query.q,
            tag_id: query.tag,
            author_id: query.author,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateWorkRequest {
    #[validate(length(min = 1, max = 300, message = "Title must be 1-300 characters"))]
    pub title: String,

    #[validate(length(max = 10000, message = "Description must be at most 10000 characters"))]
    pub description: Option<String>,

    #[validate(length(min = 2, max = 16, message = "Language must be a language tag"))]
    pub original_language: Option<String>,

    #[validate(range(min = -3000, max = 2100, message = "Year is out of range"))]
    pub first_published_year: Option<i32>,

    #[validate(length(min = 1, max = 20, message = "A work needs 1-20 authors"))]
    pub author_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateWorkRequest {
    #[validate(length(min = 1, max = 300, message = "Title must be 1-300 characters"))]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 10000, message = "Description must be at most 10000 characters"))]
    pub description: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(min = 2, max = 16, message = "Language must be a language tag"))]
    pub original_language: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(range(min = -3000, max = 2100, message = "Year is out of range"))]
    pub first_published_year: Option<Option<i32>>,

    /// Replaces the whole author list when present
    #[validate(length(min = 1, max = 20, message = "A work needs 1-20 authors"))]
    pub author_ids: Option<Vec<Uuid>>,
}

pub async fn list_works(
    State(state): State<AppState>,
    ApiQuery(page): ApiQuery<PageRequest>,
    ApiQuery(query): ApiQuery<WorkQuery>,
) -> ApiResult<Json<Page<WorkListItem>>> {
    let works = Work::list(&state.db, &WorkFilter::from(query), page).await?;
    Ok(Json(works))
}

pub async fn get_work(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkDetail>> {
    let detail = Work::find_detail(&state.db, id)
        .await?
        .ok_or_else(|| not_found("Work"))?;

    Ok(Json(detail))
}

/// Create work (admin)
///
/// Authors are linked in the same transaction as the insert.
///
/// # Errors
///
/// - `404 Not Found`: An author id does not exist
/// - `422 Unprocessable Entity`: Validation failed
pub async fn create_work(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateWorkRequest>,
) -> ApiResult<(StatusCode, Json<Work>)> {
    let work = Work::create(
        &state.db,
        CreateWork {
            title: req.title.trim().to_string(),
            description: clean_text(req.description),
            original_language: clean_text(req.original_language),
            first_published_year: req.first_published_year,
            author_ids: req.author_ids,
        },
    )
    .await?;

    tracing::info!(work_id = %work.id, title = %work.title, "Work created");

    Ok((StatusCode::CREATED, Json(work)))
}

pub async fn update_work(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateWorkRequest>,
) -> ApiResult<Json<Work>> {
    let update = UpdateWork {
        title: req.title.map(|t| t.trim().to_string()),
        description: req.description.map(clean_text),
        original_language: req.original_language.map(clean_text),
        first_published_year: req.first_published_year,
        author_ids: req.author_ids,
    };

    let work = Work::update(&state.db, id, update)
        .await?
        .ok_or_else(|| not_found("Work"))?;

    Ok(Json(work))
}

/// Delete work (admin)
///
/// Editions go with the work. Fails with `409 Conflict` while any edition
/// appears on an order.
pub async fn delete_work(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let removed_keys = Work::delete(&state.db, id)
        .await?
        .ok_or_else(|| not_found("Work"))?;

    cleanup_after_commit(state.blob_store.as_ref(), &state.db, &removed_keys).await;

    tracing::info!(work_id = %id, images = removed_keys.len(), "Work deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_into_filter() {
        let tag = Uuid::new_v4();
        let filter = WorkFilter::from(WorkQuery {
            q: Some("earthsea".into()),
            tag: Some(tag),
            author: None,
        });
        assert_eq!(filter.search.as_deref(), Some("earthsea"));
        assert_eq!(filter.tag_id, Some(tag));
        assert!(filter.author_id.is_none());
    }

    #[test]
    fn test_create_requires_an_author() {
        let req: CreateWorkRequest = serde_json::from_value(serde_json::json!({
            "title": "A Wizard of Earthsea",
            "author_ids": []
        }))
        .unwrap();
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("author_ids"));
    }

    #[test]
    fn test_update_year_range() {
        let req: UpdateWorkRequest =
            serde_json::from_value(serde_json::json!({ "first_published_year": 3000 })).unwrap();
        assert!(req.validate().is_err());

        let cleared: UpdateWorkRequest =
            serde_json::from_value(serde_json::json!({ "first_published_year": null })).unwrap();
        assert!(cleared.validate().is_ok());
        assert_eq!(cleared.first_published_year, Some(None));
    }
}
