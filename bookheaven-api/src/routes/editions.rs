/// Book edition endpoints
///
/// # Endpoints
///
/// - `GET /v1/editions?work=&format=&q=&sort=&page=` - List editions (public)
/// - `GET /v1/editions/:id` - Edition with its work, authors and rating (public)
/// - `POST /v1/editions` - Create edition (admin)
/// - `PATCH /v1/editions/:id` - Update edition (admin)
/// - `DELETE /v1/editions/:id` - Delete edition (admin)
///
/// `sort` is one of `newest` (default), `price_asc`, `price_desc`, `title`.

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
        author::Author,
        edition::{
            CreateEdition, Edition, EditionFilter, EditionFormat, EditionListItem, EditionSort,
            UpdateEdition,
        },
        review::{RatingSummary, Review},
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
pub struct EditionQuery {
    pub work: Option<Uuid>,
    pub format: Option<EditionFormat>,
    /// Matches the work title or the ISBN
    pub q: Option<String>,
    #[serde(default)]
    pub sort: EditionSort,
}

impl From<EditionQuery> for EditionFilter {
    fn from(query: EditionQuery) -> Self {
        EditionFilter {
            work_id: query.work,
            format: query.format,
            search: query.q,
            sort: query.sort,
        }
    }
}

/// Everything a product page shows
#[derive(Debug, Serialize)]
pub struct EditionDetail {
    #[serde(flatten)]
    pub edition: Edition,
    pub work: Work,
    pub authors: Vec<Author>,
    pub rating: RatingSummary,
}

fn default_currency() -> String {
    "usd".to_string()
}

/// ISBN-10 or ISBN-13, hyphens allowed
fn check_isbn(isbn: &str) -> Result<(), ValidationError> {
    let digits: Vec<char> = isbn.chars().filter(|c| *c != '-').collect();
    let valid = match digits.len() {
        13 => digits.iter().all(|c| c.is_ascii_digit()),
        10 => {
            digits[..9].iter().all(|c| c.is_ascii_digit())
                && (digits[9].is_ascii_digit() || digits[9] == 'X' || digits[9] == 'x')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("isbn");
        err.message = Some("ISBN must have 10 or 13 digits".into());
        Err(err)
    }
}

fn check_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("Currency must be a three-letter ISO code".into());
        Err(err)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEditionRequest {
    pub work_id: Uuid,

    #[validate(custom(function = "check_isbn"))]
    pub isbn: Option<String>,

    pub format: EditionFormat,

    #[validate(length(min = 2, max = 16, message = "Language must be a language tag"))]
    pub language: String,

    #[validate(length(max = 200, message = "Publisher must be at most 200 characters"))]
    pub publisher: Option<String>,

    pub published_on: Option<NaiveDate>,

    #[validate(range(min = 1, max = 100000, message = "Page count is out of range"))]
    pub page_count: Option<i32>,

    #[validate(range(min = 0, message = "Price must not be negative"))]
    pub price_cents: i64,

    #[serde(default = "default_currency")]
    #[validate(custom(function = "check_currency"))]
    pub currency: String,

    #[serde(default)]
    #[validate(range(min = 0, message = "Stock must not be negative"))]
    pub stock: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateEditionRequest {
    #[serde(default, deserialize_with = "nullable")]
    #[validate(custom(function = "check_isbn"))]
    pub isbn: Option<Option<String>>,

    pub format: Option<EditionFormat>,

    #[validate(length(min = 2, max = 16, message = "Language must be a language tag"))]
    pub language: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 200, message = "Publisher must be at most 200 characters"))]
    pub publisher: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    pub published_on: Option<Option<NaiveDate>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(range(min = 1, max = 100000, message = "Page count is out of range"))]
    pub page_count: Option<Option<i32>>,

    #[validate(range(min = 0, message = "Price must not be negative"))]
    pub price_cents: Option<i64>,

    #[validate(custom(function = "check_currency"))]
    pub currency: Option<String>,

    #[validate(range(min = 0, message = "Stock must not be negative"))]
    pub stock: Option<i32>,
}

pub async fn list_editions(
    State(state): State<AppState>,
    ApiQuery(page): ApiQuery<PageRequest>,
    ApiQuery(query): ApiQuery<EditionQuery>,
) -> ApiResult<Json<Page<EditionListItem>>> {
    let editions = Edition::list(&state.db, &EditionFilter::from(query), page).await?;
    Ok(Json(editions))
}

pub async fn get_edition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EditionDetail>> {
    let edition = Edition::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| not_found("Edition"))?;

    let work = Work::find_by_id(&state.db, edition.work_id)
        .await?
        .ok_or_else(|| not_found("Work"))?;
    let authors = Author::list_for_work(&state.db, work.id).await?;
    let rating = Review::rating_summary(&state.db, id).await?;

    Ok(Json(EditionDetail {
        edition,
        work,
        authors,
        rating,
    }))
}

/// Create edition (admin)
///
/// # Errors
///
/// - `404 Not Found`: The work does not exist
/// - `409 Conflict`: The ISBN is already used
/// - `422 Unprocessable Entity`: Validation failed
pub async fn create_edition(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateEditionRequest>,
) -> ApiResult<(StatusCode, Json<Edition>)> {
    let edition = Edition::create(
        &state.db,
        CreateEdition {
            work_id: req.work_id,
            isbn: clean_text(req.isbn),
            format: req.format,
            language: req.language.trim().to_string(),
            publisher: clean_text(req.publisher),
            published_on: req.published_on,
            page_count: req.page_count,
            price_cents: req.price_cents,
            currency: req.currency.to_ascii_lowercase(),
            stock: req.stock,
        },
    )
    .await?;

    tracing::info!(
        edition_id = %edition.id,
        work_id = %edition.work_id,
        format = edition.format.as_str(),
        "Edition created"
    );

    Ok((StatusCode::CREATED, Json(edition)))
}

pub async fn update_edition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateEditionRequest>,
) -> ApiResult<Json<Edition>> {
    let update = UpdateEdition {
        isbn: req.isbn.map(clean_text),
        format: req.format,
        language: req.language.map(|l| l.trim().to_string()),
        publisher: req.publisher.map(clean_text),
        published_on: req.published_on,
        page_count: req.page_count,
        price_cents: req.price_cents,
        currency: req.currency.map(|c| c.to_ascii_lowercase()),
        stock: req.stock,
    };

    let edition = Edition::update(&state.db, id, update)
        .await?
        .ok_or_else(|| not_found("Edition"))?;

    Ok(Json(edition))
}

/// Delete edition (admin)
///
/// Fails with `409 Conflict` once the edition appears on an order.
pub async fn delete_edition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let removed_keys = Edition::delete(&state.db, id)
        .await?
        .ok_or_else(|| not_found("Edition"))?;

    cleanup_after_commit(state.blob_store.as_ref(), &state.db, &removed_keys).await;

    tracing::info!(edition_id = %id, images = removed_keys.len(), "Edition deleted");

    Ok(StatusCode::NO_CONTENT)
}
