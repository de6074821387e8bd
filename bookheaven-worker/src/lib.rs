//! # BookHeaven Worker Library
//!
//! Background jobs that keep the store's data consistent after the API has
//! answered.
//!
//! ## Modules
//!
//! - `config`: Environment configuration
//! - `queue`: Retries blob deletions that failed after an image change
//! - `expiry`: Cancels abandoned checkouts and returns their stock
//! - `orchestrator`: Runs the jobs on an interval until shutdown

pub mod config;
pub mod expiry;
pub mod orchestrator;
pub mod queue;
