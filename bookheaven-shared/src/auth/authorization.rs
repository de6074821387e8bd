/// Role and ownership checks
///
/// Catalog mutations and order administration need [`Role::Admin`]. Reviews,
/// shelves and orders belong to the user that created them; admins may act
/// on any of them where the route allows it.

use super::middleware::{AuthContext, Role};

/// Error type for authorization checks
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthzError {
    #[error("Admin role required")]
    AdminRequired,

    /// Caller does not own the resource
    #[error("Not authorized to access this resource")]
    NotAuthorized,
}

pub fn require_admin(auth: &AuthContext) -> Result<(), AuthzError> {
    if auth.role != Role::Admin {
        return Err(AuthzError::AdminRequired);
    }

    Ok(())
}

/// Passes only for the resource owner, regardless of role
pub fn require_owner(auth: &AuthContext, owner_id: &str) -> Result<(), AuthzError> {
    if auth.user_id != owner_id {
        return Err(AuthzError::NotAuthorized);
    }

    Ok(())
}

pub fn require_owner_or_admin(auth: &AuthContext, owner_id: &str) -> Result<(), AuthzError> {
    if auth.is_admin() {
        return Ok(());
    }

    require_owner(auth, owner_id)
}
