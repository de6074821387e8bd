/// Database models for BookHeaven
///
/// Each model owns the SQL for its table(s). Simple CRUD returns
/// `sqlx::Error` directly; operations that can fail for domain reasons
/// (validation, conflicts, missing parents) return [`ModelError`].
///
/// # Models
///
/// - `author`: Authors and their works
/// - `work`: Book works (the abstract title) with author and tag links
/// - `edition`: Purchasable editions of a work
/// - `image`: Edition and author images, with the transactional swap
/// - `tag`: Case-insensitively unique tags
/// - `review`: Edition reviews and likes
/// - `shelf`: User-curated book lists
/// - `order`: Orders and their line items
/// - `orphaned_blob`: Blob deletions awaiting retry

pub mod author;
pub mod edition;
pub mod image;
pub mod order;
pub mod orphaned_blob;
pub mod review;
pub mod shelf;
pub mod tag;
pub mod work;

/// Errors from model operations that go beyond plain SQL failures
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Referenced row does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Operation conflicts with existing state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Input rejected before reaching the database
    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Whether `err` is a unique-constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

/// Whether `err` is a foreign-key violation
pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23503"),
        _ => false,
    }
}

/// Whether `err` is a string too long for its column
pub fn is_value_too_long(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("22001"),
        _ => false,
    }
}
