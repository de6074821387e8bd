//! # BookHeaven Shared Library
//!
//! Types, data access and integrations used by both the BookHeaven API
//! server and its background worker.
//!
//! ## Module Organization
//!
//! - `db`: Connection pool and migrations
//! - `models`: Catalog, community and order models
//! - `pagination`: Page/offset helpers shared by list queries
//! - `auth`: Session verification and authorization
//! - `identity`: Identity provider user lookup
//! - `payments`: Hosted checkout and payment webhooks
//! - `storage`: Blob deletion for uploaded images
//! - `redis`: Redis client and rate limiting

pub mod auth;
pub mod db;
pub mod identity;
pub mod models;
pub mod pagination;
pub mod payments;
pub mod redis;
pub mod storage;

/// Current version of the BookHeaven shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
