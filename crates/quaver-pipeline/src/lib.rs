//! The ingestion pipeline: pass driver, catalog passes, audio
//! fingerprinting, and entity resolution.
//!
//! Everything here consumes the durable queue and storage primitives from
//! `quaver-core`. Catalog access goes through the traits in [`clients`], so
//! every pass can run against in-memory fakes in tests.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod audio;
pub mod clients;
pub mod compare;
pub mod config;
pub mod context;
pub mod cred;
pub mod driver;
pub mod error;
pub mod merge;
pub mod passes;
pub mod registry;
pub mod seed;
pub mod util;

pub use context::PassContext;
pub use driver::Scheduler;
pub use error::{PipelineError, PipelineResult};

/// Common backoff windows for queue retries.
pub const HOUR_MS: i64 = 60 * 60 * 1000;
pub const DAY_MS: i64 = 24 * HOUR_MS;
