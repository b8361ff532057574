//! Coverage reconciliation between the remote collection and the local store.
//!
//! Each invocation builds two fresh [`Aggregate`]s, one from a full remote
//! scan and one from the local files, and compares them into a
//! [`CoverageReport`]. A failure anywhere in the remote scan aborts the whole
//! reconciliation; a partial remote aggregate is never compared.

pub mod report;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::Result;
use crate::models::{DerivedState, Record};
use crate::rate::RateGovernor;
use crate::remote::{PageQuery, PullSummary, RemoteSource};
use crate::storage::LocalStore;

/// Labels kept in the report, ranked by absolute difference.
pub const LABEL_REPORT_LIMIT: usize = 10;

/// Coverage below this percentage is materially incomplete.
pub const COVERAGE_THRESHOLD: f64 = 95.0;

/// Per-state absolute difference above which a recollection is advised.
pub const STATE_DELTA_THRESHOLD: u64 = 10;

/// Counts per derived state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub open: u64,
    pub closed: u64,
    pub merged: u64,
    /// Local records without a state or merge time.
    pub unknown: u64,
}

impl StateCounts {
    pub fn add(&mut self, state: Option<DerivedState>) {
        match state {
            Some(DerivedState::Open) => self.open += 1,
            Some(DerivedState::Closed) => self.closed += 1,
            Some(DerivedState::Merged) => self.merged += 1,
            None => self.unknown += 1,
        }
    }

    pub fn get(&self, state: DerivedState) -> u64 {
        match state {
            DerivedState::Open => self.open,
            DerivedState::Closed => self.closed,
            DerivedState::Merged => self.merged,
        }
    }
}

/// Counts over one view of the collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregate {
    pub total: u64,
    /// Entry files seen, including unreadable ones. Local view only.
    pub file_count: u64,
    pub states: StateCounts,
    pub labels: BTreeMap<String, u64>,
    pub actors: BTreeMap<String, u64>,
    /// Keyed by creation month, `YYYY-MM`.
    pub months: BTreeMap<String, u64>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_summary(&mut self, pull: &PullSummary) {
        self.total += 1;
        self.states
            .add(DerivedState::derive(Some(pull.state), pull.merged_at.as_ref()));
        let names: BTreeSet<&str> = pull.labels.iter().map(|l| l.name.as_str()).collect();
        for name in names {
            *self.labels.entry(name.to_string()).or_default() += 1;
        }
        if let Some(ref user) = pull.user {
            *self.actors.entry(user.login.clone()).or_default() += 1;
        }
        *self
            .months
            .entry(pull.created_at.format("%Y-%m").to_string())
            .or_default() += 1;
    }

    pub fn add_record(&mut self, record: &Record) {
        self.total += 1;
        self.states.add(record.derived_state());
        for name in record.label_names() {
            *self.labels.entry(name.to_string()).or_default() += 1;
        }
        if let Some(ref user) = record.basic_info.user {
            *self.actors.entry(user.login.clone()).or_default() += 1;
        }
        if let Some(created) = record.basic_info.created_at {
            *self
                .months
                .entry(created.format("%Y-%m").to_string())
                .or_default() += 1;
        }
    }

    /// Scan the whole remote listing, newest first, up to `max_pages` pages.
    pub fn scan_remote<R: RemoteSource + ?Sized>(
        remote: &R,
        governor: &RateGovernor,
        page_size: u32,
        max_pages: u32,
    ) -> Result<Self> {
        let mut aggregate = Self::new();
        for page in 1..=max_pages {
            governor.gate(remote)?;
            let items = remote.list_page(&PageQuery::created_desc(page_size, page))?;
            if items.is_empty() {
                return Ok(aggregate);
            }
            let full = items.len() >= page_size as usize;
            for item in &items {
                aggregate.add_summary(item);
            }
            tracing::debug!(page, total = aggregate.total, "scanned remote page");
            if !full {
                return Ok(aggregate);
            }
        }
        tracing::warn!(
            max_pages,
            total = aggregate.total,
            "remote scan stopped at page cap, counts cover only the newest items"
        );
        Ok(aggregate)
    }

    /// Aggregate every readable entry of the local store. Unreadable files are
    /// counted in `file_count` and otherwise skipped.
    pub fn scan_local(store: &LocalStore) -> Result<Self> {
        let mut aggregate = Self::new();
        if !store.root().is_dir() {
            tracing::warn!(dir = %store.root().display(), "data directory does not exist");
            return Ok(aggregate);
        }
        for (number, path) in store.entry_files()? {
            aggregate.file_count += 1;
            match store.read_path(number, &path) {
                Ok(record) => aggregate.add_record(&record),
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping unreadable entry"),
            }
        }
        Ok(aggregate)
    }
}

/// Remote vs. local count for one dimension value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountDelta {
    pub remote: u64,
    pub local: u64,
    /// `remote - local`
    pub difference: i64,
}

impl CountDelta {
    pub fn new(remote: u64, local: u64) -> Self {
        Self {
            remote,
            local,
            difference: remote as i64 - local as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateDelta {
    pub state: DerivedState,
    #[serde(flatten)]
    pub counts: CountDelta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelDelta {
    pub label: String,
    #[serde(flatten)]
    pub counts: CountDelta,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub remote_total: u64,
    pub local_total: u64,
    pub local_file_count: u64,
    pub difference: i64,
    pub coverage_percentage: f64,
}

/// `local / remote * 100`, 0 when the remote is empty.
pub fn coverage_percentage(local_total: u64, remote_total: u64) -> f64 {
    if remote_total == 0 {
        0.0
    } else {
        local_total as f64 / remote_total as f64 * 100.0
    }
}

/// Advisory follow-up derived from fixed thresholds.
#[derive(Debug, Clone, PartialEq)]
pub enum Recommendation {
    CollectMissing { count: u64 },
    RefreshSurplus { count: u64 },
    RecollectBroadly { coverage: f64 },
    RecollectState { state: DerivedState, difference: u64 },
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::CollectMissing { count } => write!(
                f,
                "{} pull requests are missing locally. Run `prm sync --mode gap-priority` or a recency sync.",
                count
            ),
            Recommendation::RefreshSurplus { count } => write!(
                f,
                "The local store holds {} more entries than the remote listing. Check for deleted pull requests or a truncated remote scan.",
                count
            ),
            Recommendation::RecollectBroadly { coverage } => write!(
                f,
                "Coverage is {:.1}%. Consider a full sequential recollection.",
                coverage
            ),
            Recommendation::RecollectState { state, difference } => write!(
                f,
                "{} {} pull requests differ. Run `prm sync --mode state-check` to refresh them.",
                difference, state
            ),
        }
    }
}

impl Serialize for Recommendation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Result of one reconciliation. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub summary: CoverageSummary,
    pub states: Vec<StateDelta>,
    pub labels: Vec<LabelDelta>,
    pub recommendations: Vec<Recommendation>,
}

impl CoverageReport {
    /// Neither complete nor within the coverage threshold.
    pub fn is_materially_incomplete(&self) -> bool {
        self.summary.difference != 0 && self.summary.coverage_percentage < COVERAGE_THRESHOLD
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_materially_incomplete() { 1 } else { 0 }
    }
}

/// Compare a remote aggregate with a local one.
pub fn reconcile(remote: &Aggregate, local: &Aggregate) -> CoverageReport {
    let difference = remote.total as i64 - local.total as i64;
    let summary = CoverageSummary {
        remote_total: remote.total,
        local_total: local.total,
        local_file_count: local.file_count,
        difference,
        coverage_percentage: coverage_percentage(local.total, remote.total),
    };

    let states: Vec<StateDelta> = DerivedState::ALL
        .iter()
        .map(|&state| StateDelta {
            state,
            counts: CountDelta::new(remote.states.get(state), local.states.get(state)),
        })
        .collect();

    let names: BTreeSet<&String> = remote.labels.keys().chain(local.labels.keys()).collect();
    let mut labels: Vec<LabelDelta> = names
        .into_iter()
        .map(|name| LabelDelta {
            label: name.clone(),
            counts: CountDelta::new(
                remote.labels.get(name).copied().unwrap_or(0),
                local.labels.get(name).copied().unwrap_or(0),
            ),
        })
        .filter(|d| d.counts.remote > 0 || d.counts.local > 0)
        .collect();
    labels.sort_by_key(|d| std::cmp::Reverse(d.counts.difference.unsigned_abs()));
    labels.truncate(LABEL_REPORT_LIMIT);

    let mut recommendations = Vec::new();
    if difference > 0 {
        recommendations.push(Recommendation::CollectMissing {
            count: difference as u64,
        });
    } else if difference < 0 {
        recommendations.push(Recommendation::RefreshSurplus {
            count: difference.unsigned_abs(),
        });
    }
    if summary.coverage_percentage < COVERAGE_THRESHOLD {
        recommendations.push(Recommendation::RecollectBroadly {
            coverage: summary.coverage_percentage,
        });
    }
    for delta in &states {
        let abs = delta.counts.difference.unsigned_abs();
        if abs > STATE_DELTA_THRESHOLD {
            recommendations.push(Recommendation::RecollectState {
                state: delta.state,
                difference: abs,
            });
        }
    }

    CoverageReport {
        summary,
        states,
        labels,
        recommendations,
    }
}
