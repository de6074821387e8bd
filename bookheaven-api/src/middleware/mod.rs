/// Middleware modules for the API server
///
/// - `security`: hardening headers on every response
/// - `rate_limit`: per-user token buckets for write and checkout routes

pub mod rate_limit;
pub mod security;
