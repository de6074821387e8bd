/// Author endpoints
///
/// # Endpoints
///
/// - `GET /v1/authors?q=&page=&page_size=` - Search authors (public)
/// - `GET /v1/authors/:id` - Author with works (public)
/// - `POST /v1/authors` - Create author (admin)
/// - `PATCH /v1/authors/:id` - Update author (admin)
/// - `DELETE /v1/authors/:id` - Delete author (admin)

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
    models::{
        author::{Author, CreateAuthor, UpdateAuthor},
        work::Work,
    },
    pagination::{Page, PageRequest},
    storage::cleanup_after_commit,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Default, Deserialize)]
pub struct AuthorQuery {
    /// Case-insensitive substring of the name
    pub q: Option<String>,
}

/// Author with the works they wrote
#[derive(Debug, Serialize)]
pub struct AuthorDetail {
    #[serde(flatten)]
    pub author: Author,
    pub works: Vec<Work>,
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "check_create_dates"))]
pub struct CreateAuthorRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    #[validate(length(max = 5000, message = "Bio must be at most 5000 characters"))]
    pub bio: Option<String>,

    pub birth_date: Option<NaiveDate>,
    pub death_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "check_update_dates"))]
pub struct UpdateAuthorRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 5000, message = "Bio must be at most 5000 characters"))]
    pub bio: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    pub birth_date: Option<Option<NaiveDate>>,

    #[serde(default, deserialize_with = "nullable")]
    pub death_date: Option<Option<NaiveDate>>,
}

fn check_dates(birth: Option<NaiveDate>, death: Option<NaiveDate>) -> Result<(), ValidationError> {
    match (birth, death) {
        (Some(birth), Some(death)) if death < birth => {
            let mut err = ValidationError::new("date_order");
            err.message = Some("Death date must not precede birth date".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

fn check_create_dates(req: &CreateAuthorRequest) -> Result<(), ValidationError> {
    check_dates(req.birth_date, req.death_date)
}

// Only catches contradictions inside one request; stored dates are not consulted
fn check_update_dates(req: &UpdateAuthorRequest) -> Result<(), ValidationError> {
    check_dates(req.birth_date.flatten(), req.death_date.flatten())
}

pub async fn list_authors(
    State(state): State<AppState>,
    ApiQuery(page): ApiQuery<PageRequest>,
    ApiQuery(query): ApiQuery<AuthorQuery>,
) -> ApiResult<Json<Page<Author>>> {
    let authors = Author::search(&state.db, query.q.as_deref(), page).await?;
    Ok(Json(authors))
}

pub async fn get_author(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AuthorDetail>> {
    let author = Author::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| not_found("Author"))?;

    let works = Work::list_for_author(&state.db, id).await?;

    Ok(Json(AuthorDetail { author, works }))
}

/// Create author (admin)
///
/// # Errors
///
/// - `403 Forbidden`: Caller is not an admin
/// - `422 Unprocessable Entity`: Validation failed
pub async fn create_author(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateAuthorRequest>,
) -> ApiResult<(StatusCode, Json<Author>)> {
    let author = Author::create(
        &state.db,
        CreateAuthor {
            name: req.name.trim().to_string(),
            bio: clean_text(req.bio),
            birth_date: req.birth_date,
            death_date: req.death_date,
        },
    )
    .await?;

    tracing::info!(author_id = %author.id, name = %author.name, "Author created");

    Ok((StatusCode::CREATED, Json(author)))
}

pub async fn update_author(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateAuthorRequest>,
) -> ApiResult<Json<Author>> {
    let update = UpdateAuthor {
        name: req.name.map(|n| n.trim().to_string()),
        bio: req.bio.map(clean_text),
        birth_date: req.birth_date,
        death_date: req.death_date,
    };

    let author = Author::update(&state.db, id, update)
        .await?
        .ok_or_else(|| not_found("Author"))?;

    Ok(Json(author))
}

/// Delete author (admin)
///
/// The author's stored images are deleted from blob storage once the row
/// is gone.
pub async fn delete_author(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let removed_keys = Author::delete(&state.db, id)
        .await?
        .ok_or_else(|| not_found("Author"))?;

    cleanup_after_commit(state.blob_store.as_ref(), &state.db, &removed_keys).await;

    tracing::info!(author_id = %id, images = removed_keys.len(), "Author deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_create_request_validation() {
        let ok: CreateAuthorRequest = serde_json::from_value(serde_json::json!({
            "name": "Ursula K. Le Guin",
            "birth_date": "1929-10-21",
            "death_date": "2018-01-22"
        }))
        .unwrap();
        assert!(ok.validate().is_ok());

        let empty: CreateAuthorRequest =
            serde_json::from_value(serde_json::json!({ "name": "" })).unwrap();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_death_before_birth_rejected() {
        assert!(check_dates(Some(date(1950, 1, 1)), Some(date(1900, 1, 1))).is_err());
        assert!(check_dates(Some(date(1900, 1, 1)), None).is_ok());
        assert!(check_dates(None, Some(date(1900, 1, 1))).is_ok());
    }

    #[test]
    fn test_update_request_tracks_nulls() {
        let req: UpdateAuthorRequest =
            serde_json::from_value(serde_json::json!({ "bio": null })).unwrap();
        assert!(req.name.is_none());
        assert_eq!(req.bio, Some(None));
        assert!(req.birth_date.is_none());
        assert!(req.validate().is_ok());
    }
}
