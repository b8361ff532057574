//! CLI argument definitions for prm.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use crate::models::SyncMode;

/// prm - Mirror a repository's pull requests into a local file store.
///
/// Start with `prm sync` to collect, then `prm gaps` and `prm validate` to
/// check the mirror against the remote.
#[derive(Parser, Debug)]
#[command(name = "prm")]
#[command(long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("PRM_GIT_COMMIT"), ", built ", env!("PRM_BUILD_TIMESTAMP"), ")"))]
#[command(author, version = crate::VERSION, about = "Mirror pull requests locally and validate coverage", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Config file (default: ./prm.kdl when present)
    #[arg(long, global = true, env = "PRM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Repository to mirror, as owner/name
    #[arg(long, global = true)]
    pub repository: Option<String>,

    /// Local store directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Remote API root
    #[arg(long, global = true)]
    pub api_base_url: Option<String>,

    /// API token (default: GITHUB_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Debug logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect pull requests from the remote into the local store
    Sync {
        /// Collection strategy
        #[arg(long, value_enum, default_value_t = SyncMode::Recency)]
        mode: SyncMode,

        /// Store directory for this run (overrides --data-dir)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Stop after this many entries
        #[arg(long)]
        max_count: Option<u64>,

        /// First identifier (sequential mode)
        #[arg(long, default_value_t = 1)]
        start: u64,

        /// Last identifier (sequential mode, open-ended when omitted)
        #[arg(long)]
        end: Option<u64>,

        /// Ignore items last updated before this time (ISO 8601 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_since)]
        since: Option<DateTime<Utc>>,

        /// State-check window in days when --since is not given
        #[arg(long, default_value_t = 7)]
        recent_days: u32,
    },

    /// Compare local aggregate counts with the remote and write a coverage report
    ///
    /// Exit codes: 0 complete or coverage >= 95%, 1 coverage below 95%, 2 error.
    Validate {
        /// Report file (default: <reports-dir>/validation_report_<timestamp>.md)
        #[arg(long)]
        output_file: Option<PathBuf>,

        /// Print the report without writing a file
        #[arg(long)]
        console_only: bool,
    },

    /// List identifiers missing from the local store
    Gaps {
        /// Ask the remote issue namespace what each missing identifier is
        #[arg(long)]
        probe: bool,
    },

    /// Show local store counts and the last sync run (offline)
    Status,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved settings and where each value came from
    Show,
}

/// Parse an RFC 3339 timestamp or a plain date (midnight UTC).
pub fn parse_since(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("expected ISO 8601 timestamp or YYYY-MM-DD, got {}", s))
}
