//! Configuration for pr-mirror.
//!
//! ## prm.kdl - Mirror settings (safe to commit)
//!
//! Located at `--config <path>` / `PRM_CONFIG`, else `./prm.kdl` when present.
//!
//! Contains:
//! - `api-base-url` - Remote API root
//! - `repository` - `owner/name` of the mirrored repository
//! - `data-dir` / `reports-dir` - Local store root and report output directory
//! - `request-delay-ms` - Pause after every per-item fetch
//! - `low-water-mark` - Remaining budget below which calls wait for reset
//! - `page-size` / `max-scan-pages` - Listing page size and full-scan cap
//! - `reset-poll-secs` - Wait when a reset time is already in the past
//! - `open-range-miss-limit` - End of an open-ended sequential sync
//! - `known-exceptions` - Cross-numbered identifiers excluded from gaps
//!
//! ## Precedence
//!
//! CLI flag > environment variable > config file > defaults. The API token
//! only comes from `--token` or `GITHUB_TOKEN`.
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

pub use resolver::{
    ConfigOverrides, Resolved, ResolvedConfig, ValueSource, mask_token, resolve_config,
    resolve_with,
};
pub use schema::{MirrorFileConfig, Repository};

use crate::cancel::CancelToken;
use crate::rate::RateGovernor;
use crate::{Error, Result};

/// Public GitHub REST API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// Identifiers known to be tracking issues in the shared numbering space.
pub const DEFAULT_KNOWN_EXCEPTIONS: [u64; 7] = [181, 182, 194, 215, 802, 931, 1803];

/// Settings every command runs with, after precedence resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorConfig {
    pub api_base_url: String,
    pub repository: Option<Repository>,
    pub token: Option<String>,
    pub data_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub request_delay: Duration,
    pub low_water_mark: u64,
    pub page_size: u32,
    pub max_scan_pages: u32,
    pub reset_poll: Duration,
    pub open_range_miss_limit: u64,
    pub known_exceptions: BTreeSet<u64>,
}

impl MirrorConfig {
    /// Repository, required by every command that talks to the remote.
    pub fn require_repository(&self) -> Result<&Repository> {
        self.repository.as_ref().ok_or_else(|| {
            Error::Config(
                "no repository configured (use --repository, PRM_REPOSITORY or `repository` in prm.kdl)"
                    .to_string(),
            )
        })
    }

    pub fn governor(&self, cancel: CancelToken) -> RateGovernor {
        RateGovernor::new(self.low_water_mark, self.reset_poll, cancel)
    }
}
