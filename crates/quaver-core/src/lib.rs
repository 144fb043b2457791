//! Core engine for quaver.
//!
//! This crate defines the entity graph (tracks, albums, artists and their
//! cross-cutting locale/link/image tables), the snowflake identifier
//! allocator, the persistent work queue, the sharded content-addressed
//! media store, and the append-only diagnostic journal.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod journal;
pub mod model;
pub mod queue;
pub mod schema;
pub mod snowflake;
pub mod store;

pub use error::{Error, Result};

/// Current unix time in milliseconds, the clock every queue expiry and
/// snowflake timestamp is measured against.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
