//! Command implementations for the prm CLI.
//!
//! Each command returns a result struct implementing [`Output`]; `main`
//! chooses between JSON and human-readable rendering. Commands that talk to
//! the remote are generic over [`RemoteSource`] so they can run against a
//! mock in tests.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::{MirrorConfig, ResolvedConfig, ValueSource};
use crate::gaps::{GapDetector, MaxSource, NumberingCoverage, ProbeReport, RECENT_WINDOW, probe_cross_numbered};
use crate::models::{RunInfo, SyncMode};
use crate::reconcile::report::{render_markdown, thousands};
use crate::reconcile::{Aggregate, CoverageReport, StateCounts, reconcile};
use crate::remote::RemoteSource;
use crate::storage::LocalStore;
use crate::sync::{SyncEngine, SyncOptions, SyncOutcome, SyncRequest};
use crate::{Error, Result};

/// Gap ranges listed before the rest is summarized as a count.
pub const GAP_RANGE_DISPLAY_LIMIT: usize = 20;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json_string<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

// === sync ===

/// Parsed `prm sync` arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncArgs {
    pub mode: SyncMode,
    pub output_dir: Option<PathBuf>,
    pub max_count: Option<u64>,
    pub start: u64,
    pub end: Option<u64>,
    pub since: Option<DateTime<Utc>>,
    pub recent_days: u32,
}

impl SyncArgs {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            output_dir: None,
            max_count: None,
            start: 1,
            end: None,
            since: None,
            recent_days: 7,
        }
    }

    /// Turn CLI arguments into an engine request.
    pub fn request(&self, now: DateTime<Utc>) -> Result<SyncRequest> {
        let max_count = self.max_count;
        Ok(match self.mode {
            SyncMode::Recency => SyncRequest::Recency {
                since: self.since,
                max_count,
            },
            SyncMode::Sequential => {
                if self.start == 0 {
                    return Err(Error::InvalidInput("--start must be at least 1".to_string()));
                }
                if let Some(end) = self.end.filter(|&end| end < self.start) {
                    return Err(Error::InvalidInput(format!(
                        "--end {} is below --start {}",
                        end, self.start
                    )));
                }
                SyncRequest::Sequential {
                    start: self.start,
                    end: self.end,
                    max_count,
                }
            }
            SyncMode::GapPriority => SyncRequest::GapPriority { max_count },
            SyncMode::StateCheck => SyncRequest::StateCheck {
                cutoff: self
                    .since
                    .unwrap_or_else(|| now - Duration::days(i64::from(self.recent_days))),
                max_count,
            },
        })
    }
}

#[derive(Serialize)]
pub struct SyncResult {
    pub data_dir: PathBuf,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

impl Output for SyncResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let o = &self.outcome;
        let mut lines = vec![
            format!("Sync ({}) {} in {}", o.mode, o.stopped.as_str(), self.data_dir.display()),
            format!("  Collected: {}", o.collected),
            format!("  Updated:   {}", o.updated),
            format!("  Unchanged: {}", o.unchanged),
            format!("  Skipped:   {}", o.skipped),
            format!("  Not found: {}", o.not_found),
        ];
        if o.failed > 0 {
            lines.push(format!("  Failed:    {}", o.failed));
        }
        lines.join("\n")
    }
}

/// Run one sync strategy into the configured (or overridden) store.
pub fn sync<R: RemoteSource + ?Sized>(
    remote: &R,
    config: &MirrorConfig,
    args: &SyncArgs,
    cancel: CancelToken,
) -> Result<SyncResult> {
    let request = args.request(Utc::now())?;
    let data_dir = args.output_dir.clone().unwrap_or_else(|| config.data_dir.clone());
    let store = LocalStore::open(&data_dir)?;
    let engine = SyncEngine::new(
        remote,
        &store,
        config.governor(cancel.clone()),
        SyncOptions::from(config),
        cancel,
    );
    let outcome = engine.run(&request)?;
    Ok(SyncResult { data_dir, outcome })
}

// === validate ===

#[derive(Serialize)]
pub struct ValidateResult {
    pub data_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
    pub materially_incomplete: bool,
    #[serde(flatten)]
    pub report: CoverageReport,
    #[serde(skip)]
    pub markdown: String,
}

impl ValidateResult {
    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }
}

impl Output for ValidateResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let mut out = self.markdown.trim_end().to_string();
        if let Some(ref path) = self.report_path {
            out.push_str(&format!("\n\nReport written to {}", path.display()));
        }
        out
    }
}

/// A data directory whose `prs/` child is a directory is read through that
/// child instead.
pub fn validation_data_dir(dir: &Path) -> PathBuf {
    let nested = dir.join("prs");
    if nested.is_dir() {
        nested
    } else {
        dir.to_path_buf()
    }
}

/// `<reports_dir>/validation_report_YYYYMMDD_HHMMSS.md`
pub fn default_report_path(reports_dir: &Path, now: DateTime<Utc>) -> PathBuf {
    reports_dir.join(format!("validation_report_{}.md", now.format("%Y%m%d_%H%M%S")))
}

/// Options of `prm validate` beyond the shared configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidateArgs {
    pub output_file: Option<PathBuf>,
    pub console_only: bool,
}

/// Compare a fresh remote scan with the local store and write the report.
pub fn validate<R: RemoteSource + ?Sized>(
    remote: &R,
    config: &MirrorConfig,
    args: &ValidateArgs,
    cancel: CancelToken,
    now: DateTime<Utc>,
) -> Result<ValidateResult> {
    let data_dir = validation_data_dir(&config.data_dir);
    let governor = config.governor(cancel);

    tracing::info!("scanning remote collection");
    let remote_agg = Aggregate::scan_remote(remote, &governor, config.page_size, config.max_scan_pages)?;
    tracing::info!(dir = %data_dir.display(), "scanning local store");
    let local_agg = Aggregate::scan_local(&LocalStore::at(&data_dir))?;

    let report = reconcile(&remote_agg, &local_agg);
    let markdown = render_markdown(&report, now);

    let report_path = if args.console_only {
        None
    } else {
        let path = args
            .output_file
            .clone()
            .unwrap_or_else(|| default_report_path(&config.reports_dir, now));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &markdown)?;
        tracing::info!(path = %path.display(), "report written");
        Some(path)
    };

    Ok(ValidateResult {
        data_dir,
        report_path,
        materially_incomplete: report.is_materially_incomplete(),
        report,
        markdown,
    })
}

// === gaps ===

/// Probe outcome plus coverage counting only identifiers that are genuinely
/// pull requests.
#[derive(Serialize)]
pub struct ProbeSummary {
    #[serde(flatten)]
    pub report: ProbeReport,
    pub coverage: NumberingCoverage,
}

#[derive(Serialize)]
pub struct GapsResult {
    pub max_known: u64,
    pub max_source: MaxSource,
    pub local_count: u64,
    pub missing_count: u64,
    pub exceptions_in_range: u64,
    pub coverage: NumberingCoverage,
    /// First ranges, rendered as `#a` or `#a-#b`.
    pub ranges: Vec<String>,
    pub more_ranges: usize,
    pub recent_missing: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeSummary>,
}

impl Output for GapsResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let source = match self.max_source {
            MaxSource::Remote => "remote",
            MaxSource::LocalFallback => "local fallback",
            MaxSource::Unknown => "unknown",
        };
        let mut lines = vec![
            format!("Highest identifier: {} ({})", thousands(self.max_known as i64), source),
            format!("Local entries: {}", thousands(self.local_count as i64)),
            format!("Missing: {}", thousands(self.missing_count as i64)),
            format!(
                "Coverage: {:.1}% ({} known exceptions excluded)",
                self.coverage.coverage_percentage, self.exceptions_in_range
            ),
        ];
        if !self.ranges.is_empty() {
            lines.push(String::new());
            lines.push("Missing ranges:".to_string());
            lines.extend(self.ranges.iter().map(|r| format!("  {}", r)));
            if self.more_ranges > 0 {
                lines.push(format!("  ... and {} more", self.more_ranges));
            }
        }
        if !self.recent_missing.is_empty() {
            let recent: Vec<String> = self.recent_missing.iter().map(|n| format!("#{}", n)).collect();
            lines.push(String::new());
            lines.push(format!(
                "Missing among the newest {}: {}",
                RECENT_WINDOW,
                recent.join(", ")
            ));
        }
        if let Some(ref probe) = self.probe {
            fn list(ns: &[u64]) -> String {
                ns.iter().map(|n| format!("#{}", n)).collect::<Vec<_>>().join(", ")
            }
            lines.push(String::new());
            lines.push("Probe:".to_string());
            lines.push(format!("  Cross-numbered issues: {}", list(&probe.report.cross_numbered)));
            lines.push(format!("  Pull requests:         {}", list(&probe.report.pull_requests)));
            lines.push(format!("  Unused:                {}", list(&probe.report.absent)));
            if !probe.report.unresolved.is_empty() {
                lines.push(format!("  Unresolved:            {}", list(&probe.report.unresolved)));
            }
            lines.push(format!(
                "  Coverage of genuine pull requests: {:.1}%",
                probe.coverage.coverage_percentage
            ));
        }
        lines.join("\n")
    }
}

/// Detect gaps and optionally probe them (together with the in-range
/// exceptions) against the issue namespace.
pub fn gaps<R: RemoteSource + ?Sized>(
    remote: &R,
    config: &MirrorConfig,
    probe: bool,
    cancel: CancelToken,
) -> Result<GapsResult> {
    let store = LocalStore::at(&config.data_dir);
    let local = store.identifiers()?;
    let report = GapDetector::new(remote, &store, &config.known_exceptions).detect()?;
    let exceptions_in_range = report.exceptions_in_range(&local);
    let coverage = report.coverage(exceptions_in_range);

    let ranges = report.ranges();
    let more_ranges = ranges.len().saturating_sub(GAP_RANGE_DISPLAY_LIMIT);

    let probe = if probe {
        let governor = config.governor(cancel);
        let mut candidates: Vec<u64> = report.missing.clone();
        candidates.extend(
            report
                .exceptions
                .iter()
                .copied()
                .filter(|n| *n <= report.max_known && !local.contains(n)),
        );
        candidates.sort_unstable();
        let probed = probe_cross_numbered(remote, &governor, candidates)?;
        let not_pull_requests = (probed.cross_numbered.len() + probed.absent.len()) as u64;
        Some(ProbeSummary {
            coverage: NumberingCoverage::compute(report.max_known, report.local_count, not_pull_requests),
            report: probed,
        })
    } else {
        None
    };

    Ok(GapsResult {
        max_known: report.max_known,
        max_source: report.max_source,
        local_count: report.local_count,
        missing_count: report.missing.len() as u64,
        exceptions_in_range,
        coverage,
        ranges: ranges
            .iter()
            .take(GAP_RANGE_DISPLAY_LIMIT)
            .map(|r| r.to_string())
            .collect(),
        more_ranges,
        recent_missing: report.recent_missing(RECENT_WINDOW),
        probe,
    })
}

// === status ===

#[derive(Serialize)]
pub struct StatusResult {
    pub data_dir: PathBuf,
    pub entries: u64,
    pub unreadable: u64,
    pub states: StateCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunInfo>,
}

impl Output for StatusResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Store: {}", self.data_dir.display()),
            format!("Entries: {}", thousands(self.entries as i64)),
            format!(
                "  open {}, closed {}, merged {}",
                self.states.open, self.states.closed, self.states.merged
            ),
        ];
        if self.states.unknown > 0 {
            lines.push(format!("  {} without a state", self.states.unknown));
        }
        if self.unreadable > 0 {
            lines.push(format!("Unreadable files: {}", self.unreadable));
        }
        match self.last_run {
            Some(ref run) => lines.push(format!(
                "Last sync: {} ({}, {}): {} collected, {} updated",
                run.last_run.format("%Y-%m-%d %H:%M:%S UTC"),
                run.mode,
                run.stopped.as_str(),
                run.collected_count,
                run.updated_count
            )),
            None => lines.push("Last sync: never".to_string()),
        }
        lines.join("\n")
    }
}

/// Summarize the local store without touching the remote.
pub fn status(config: &MirrorConfig) -> Result<StatusResult> {
    let store = LocalStore::at(&config.data_dir);
    let aggregate = Aggregate::scan_local(&store)?;
    let last_run = store.read_run_info()?;
    Ok(StatusResult {
        data_dir: config.data_dir.clone(),
        entries: aggregate.total,
        unreadable: aggregate.file_count - aggregate.total,
        states: aggregate.states,
        last_run,
    })
}

// === config show ===

#[derive(Serialize)]
pub struct ConfigShowResult {
    #[serde(flatten)]
    pub config: ResolvedConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<MaskedToken>,
}

#[derive(Serialize)]
pub struct MaskedToken {
    pub value: String,
    pub source: ValueSource,
}

impl Output for ConfigShowResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let c = &self.config;
        let exceptions: Vec<String> = c
            .known_exceptions
            .value
            .iter()
            .map(|n| n.to_string())
            .collect();
        let mut lines = vec![match c.config_file {
            Some(ref path) => format!("Config file: {}", path.display()),
            None => "Config file: (none)".to_string(),
        }];
        let mut row = |key: &str, value: String, source: &ValueSource| {
            lines.push(format!("  {:<22} {} [{}]", key, value, source));
        };
        match c.repository {
            Some(ref r) => row("repository", r.value.to_string(), &r.source),
            None => row("repository", "(unset)".to_string(), &ValueSource::Default),
        }
        row("api-base-url", c.api_base_url.value.clone(), &c.api_base_url.source);
        row("data-dir", c.data_dir.value.display().to_string(), &c.data_dir.source);
        row("reports-dir", c.reports_dir.value.display().to_string(), &c.reports_dir.source);
        row("request-delay-ms", c.request_delay_ms.value.to_string(), &c.request_delay_ms.source);
        row("low-water-mark", c.low_water_mark.value.to_string(), &c.low_water_mark.source);
        row("page-size", c.page_size.value.to_string(), &c.page_size.source);
        row("max-scan-pages", c.max_scan_pages.value.to_string(), &c.max_scan_pages.source);
        row("reset-poll-secs", c.reset_poll_secs.value.to_string(), &c.reset_poll_secs.source);
        row(
            "open-range-miss-limit",
            c.open_range_miss_limit.value.to_string(),
            &c.open_range_miss_limit.source,
        );
        row("known-exceptions", exceptions.join(" "), &c.known_exceptions.source);
        match self.token {
            Some(ref t) => row("token", t.value.clone(), &t.source),
            None => row("token", "(unset)".to_string(), &ValueSource::Default),
        }
        lines.join("\n")
    }
}

/// Show resolved settings with their sources. The token is masked.
pub fn config_show(resolved: ResolvedConfig) -> ConfigShowResult {
    let token = match (resolved.masked_token(), resolved.token_source()) {
        (Some(value), Some(source)) => Some(MaskedToken {
            value,
            source: source.clone(),
        }),
        _ => None,
    };
    ConfigShowResult {
        config: resolved,
        token,
    }
}
