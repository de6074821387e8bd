/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `authors`, `works`, `editions`: Catalog
/// - `images`: Edition and author images
/// - `tags`: Tags and work tagging
/// - `reviews`: Reviews, ratings and likes
/// - `shelves`: User shelves
/// - `me`: The signed-in user's profile and collections
/// - `orders`: Checkout and order administration
/// - `webhooks`: Payment provider callbacks

pub mod authors;
pub mod editions;
pub mod health;
pub mod images;
pub mod me;
pub mod orders;
pub mod reviews;
pub mod shelves;
pub mod tags;
pub mod webhooks;
pub mod works;

use crate::error::ApiError;
use serde::{Deserialize, Deserializer};

/// Distinguishes an explicit `null` from a missing field in PATCH bodies
///
/// Use with `#[serde(default, deserialize_with = "nullable")]`: a missing
/// field stays `None`, `null` becomes `Some(None)`.
pub(crate) fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub(crate) fn not_found(what: &str) -> ApiError {
    ApiError::NotFound(format!("{} not found", what))
}

/// Trims free text and turns blank strings into `None`
pub(crate) fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
