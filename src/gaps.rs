//! Gap detection over the dense identifier range.
//!
//! A gap is an identifier in `[1, max]` with no local entry that is not a
//! known cross-numbered exception (an identifier used by a sibling entity
//! class sharing the same counter, such as a tracking issue).

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::rate::RateGovernor;
use crate::remote::{FetchError, IssueProbe, PageQuery, RemoteSource};
use crate::storage::LocalStore;
use crate::Result;

/// Size of the "most recent identifiers" window reported separately.
pub const RECENT_WINDOW: u64 = 100;

/// Sorted identifiers in `[1, max_known]` that are neither local nor exceptions.
pub fn compute_gaps(
    max_known: u64,
    local: &BTreeSet<u64>,
    exceptions: &BTreeSet<u64>,
) -> Vec<u64> {
    (1..=max_known)
        .filter(|n| !local.contains(n) && !exceptions.contains(n))
        .collect()
}

/// A run of consecutive identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GapRange {
    pub start: u64,
    pub end: u64,
}

impl GapRange {
    /// Number of identifiers in the run.
    pub fn count(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for GapRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "#{}", self.start)
        } else {
            write!(f, "#{}-#{}", self.start, self.end)
        }
    }
}

/// Collapse a sorted identifier list into consecutive runs. For reporting only.
pub fn compress_ranges(sorted: &[u64]) -> Vec<GapRange> {
    let mut ranges: Vec<GapRange> = Vec::new();
    for &n in sorted {
        match ranges.last_mut() {
            Some(last) if last.end + 1 == n => last.end = n,
            _ => ranges.push(GapRange { start: n, end: n }),
        }
    }
    ranges
}

/// Where the upper bound of the range came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxSource {
    /// Newest created item on the remote.
    Remote,
    /// Remote query failed; local maximum used. Under-reports gaps above it.
    LocalFallback,
    /// Neither remote nor local knows any identifier.
    Unknown,
}

/// Coverage of the numbering space once cross-numbered identifiers are
/// taken out of the denominator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumberingCoverage {
    pub max_known: u64,
    pub exceptions: u64,
    pub local_total: u64,
    pub effective_missing: u64,
    pub coverage_percentage: f64,
}

impl NumberingCoverage {
    pub fn compute(max_known: u64, local_total: u64, exceptions: u64) -> Self {
        let effective_missing = max_known
            .saturating_sub(local_total)
            .saturating_sub(exceptions);
        let denominator = max_known.saturating_sub(exceptions);
        let coverage_percentage = if denominator == 0 {
            0.0
        } else {
            (local_total.min(denominator) as f64 / denominator as f64) * 100.0
        };
        Self {
            max_known,
            exceptions,
            local_total,
            effective_missing,
            coverage_percentage,
        }
    }
}

/// Result of one gap detection pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapReport {
    pub max_known: u64,
    pub max_source: MaxSource,
    pub local_count: u64,
    pub exceptions: BTreeSet<u64>,
    pub missing: Vec<u64>,
}

impl GapReport {
    pub fn ranges(&self) -> Vec<GapRange> {
        compress_ranges(&self.missing)
    }

    /// Missing identifiers among the newest `window` identifiers.
    pub fn recent_missing(&self, window: u64) -> Vec<u64> {
        if window == 0 {
            return Vec::new();
        }
        let start = self.max_known.saturating_sub(window - 1).max(1);
        self.missing.iter().copied().filter(|&n| n >= start).collect()
    }

    /// Exceptions that actually fall inside the range and have no entry.
    pub fn exceptions_in_range(&self, local: &BTreeSet<u64>) -> u64 {
        self.exceptions
            .iter()
            .filter(|&&n| n <= self.max_known && !local.contains(&n))
            .count() as u64
    }

    pub fn coverage(&self, exceptions_in_range: u64) -> NumberingCoverage {
        NumberingCoverage::compute(self.max_known, self.local_count, exceptions_in_range)
    }
}

/// Computes gaps between the remote numbering and the local store.
pub struct GapDetector<'a, R: RemoteSource + ?Sized> {
    remote: &'a R,
    store: &'a LocalStore,
    exceptions: &'a BTreeSet<u64>,
}

impl<'a, R: RemoteSource + ?Sized> GapDetector<'a, R> {
    pub fn new(remote: &'a R, store: &'a LocalStore, exceptions: &'a BTreeSet<u64>) -> Self {
        Self {
            remote,
            store,
            exceptions,
        }
    }

    /// Newest remote identifier, or `None` when the query fails or the
    /// remote is empty.
    pub fn remote_max(&self) -> Option<u64> {
        match self.remote.list_page(&PageQuery::created_desc(1, 1)) {
            Ok(items) => items.first().map(|p| p.number),
            Err(e) => {
                tracing::warn!(error = %e, "could not query newest item, using local maximum");
                None
            }
        }
    }

    pub fn detect(&self) -> Result<GapReport> {
        let local = self.store.identifiers()?;
        let (max_known, max_source) = match self.remote_max() {
            Some(max) => (max, MaxSource::Remote),
            None => match local.last() {
                Some(&max) => (max, MaxSource::LocalFallback),
                None => (0, MaxSource::Unknown),
            },
        };

        let missing = compute_gaps(max_known, &local, self.exceptions);
        tracing::info!(
            max_known,
            local = local.len(),
            missing = missing.len(),
            "gap detection complete"
        );
        Ok(GapReport {
            max_known,
            max_source,
            local_count: local.len() as u64,
            exceptions: self.exceptions.clone(),
            missing,
        })
    }
}

/// Classification of identifiers absent from the pull-request namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProbeReport {
    /// Tracking issues: legitimately absent, candidates for the exception set.
    pub cross_numbered: Vec<u64>,
    /// Pull requests after all: genuine gaps to collect.
    pub pull_requests: Vec<u64>,
    /// Unused in either namespace.
    pub absent: Vec<u64>,
    /// Probe failed; classification unknown.
    pub unresolved: Vec<u64>,
}

/// Ask the issue namespace what each identifier is. Per-identifier failures
/// are recorded as unresolved; the exception set is not modified.
pub fn probe_cross_numbered<R: RemoteSource + ?Sized>(
    remote: &R,
    governor: &RateGovernor,
    numbers: impl IntoIterator<Item = u64>,
) -> Result<ProbeReport> {
    let mut report = ProbeReport::default();
    for number in numbers {
        governor.gate(remote)?;
        match remote.probe_issue(number) {
            Ok(IssueProbe::Issue { title, state }) => {
                tracing::info!(number, %title, %state, "cross-numbered issue");
                report.cross_numbered.push(number);
            }
            Ok(IssueProbe::PullRequest) => report.pull_requests.push(number),
            Err(FetchError::NotFound) => report.absent.push(number),
            Err(FetchError::Transport(msg)) => {
                tracing::warn!(number, error = %msg, "probe failed");
                report.unresolved.push(number);
            }
        }
    }
    Ok(report)
}
