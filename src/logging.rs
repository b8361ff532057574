//! Tracing subscriber setup.
//!
//! Logs go to stderr so stdout carries only the command result.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Verbosity requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Verbosity::Verbose
        } else if quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    /// Filter used when `RUST_LOG` is unset.
    pub fn default_directive(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "pr_mirror=info,prm=info,warn",
            Verbosity::Verbose => "pr_mirror=debug,prm=debug,info",
        }
    }
}

/// Initialize the global subscriber. `RUST_LOG` takes precedence over the
/// verbosity flags.
pub fn init(verbosity: Verbosity) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .compact();

    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(verbosity.default_directive()))?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
