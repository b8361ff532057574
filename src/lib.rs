//! pr-mirror - mirrors a repository's pull requests into a local file store.
//!
//! This library provides the core functionality for the `prm` CLI tool:
//! rate-limited incremental collection, stale-entry detection, gap
//! detection over the identifier space, and coverage reconciliation
//! against the remote source.

pub mod cancel;
pub mod cli;
pub mod commands;
pub mod config;
pub mod gaps;
pub mod github;
pub mod logging;
pub mod models;
pub mod rate;
pub mod reconcile;
pub mod remote;
pub mod storage;
pub mod sync;

/// Crate version with the commit it was built from.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("PRM_GIT_COMMIT"), ")");


/// Library-level error type for pr-mirror operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Kdl(#[from] kdl::KdlError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote request failed: {0}")]
    Transport(String),

    #[error("Malformed local entry #{id}: {reason}")]
    MalformedLocalData { id: u64, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for pr-mirror operations.
pub type Result<T> = std::result::Result<T, Error>;
