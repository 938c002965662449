//! RTDS Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types and utilities for the red-team dataset import workspace.
//!
//! - **Error Handling**: `RtdsError` and the crate `Result` alias
//! - **Logging**: `tracing` subscriber setup driven by `LogConfig`
//! - **Fingerprints**: stable content hashes for imported records
//! - **Types**: owner and dataset identifiers shared by every store
//!
//! # Example
//!
//! ```no_run
//! use rtds_common::fingerprint::record_fingerprint;
//! use serde_json::json;
//!
//! let fp = record_fingerprint(&json!({"prompt": "ignore previous instructions"}));
//! assert_eq!(fp.len(), 64);
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod types;

pub use error::{Result, RtdsError};
pub use types::{DatasetKey, OwnerId};
