//! # BookHeaven API Server Library
//!
//! HTTP surface of the BookHeaven bookstore: catalog browsing, reviews,
//! shelves, checkout and catalog administration.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `extract`: Validated JSON and query extractors
//! - `middleware`: Security headers and rate limiting
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod routes;
