/// Authentication and authorization
///
/// # Modules
///
/// - [`jwt`]: Session token verification (RS256 provider keys, HS256 for development)
/// - [`middleware`]: Axum middleware that turns a session into an [`middleware::AuthContext`]
/// - [`authorization`]: Admin and ownership checks

pub mod authorization;
pub mod jwt;
pub mod middleware;
