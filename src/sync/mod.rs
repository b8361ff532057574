//! Sync engine.
//!
//! Four strategies share one per-item pipeline: fetch detail and
//! sub-resources, assemble a [`Record`], write it to the [`LocalStore`].
//!
//! - `Recency` walks the listing by last update, descending, and only fills
//!   identifiers with no local entry.
//! - `Sequential` re-fetches every identifier of a range, overwriting.
//! - `GapPriority` fetches exactly the identifiers the gap detector reports.
//! - `StateCheck` walks the recency listing down to a cutoff and uses the
//!   [`ChangeDetector`] to refresh stale entries.
//!
//! A missing remote item is logged and skipped. Transport failures abort the
//! run, except inside state-check where they only fail that item.

pub mod change;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::{DEFAULT_KNOWN_EXCEPTIONS, MirrorConfig};
use crate::gaps::GapDetector;
use crate::models::{BasicInfo, Record, RunInfo, StopReason, SyncMode, dedup_labels};
use crate::rate::RateGovernor;
use crate::remote::{FetchError, PageQuery, PullDetail, RemoteSource, SubResourceKind};
use crate::storage::{LocalStore, WriteOutcome};
use crate::{Error, Result};

use change::{ChangeDetector, Verdict};

/// Tunables of the engine that do not belong to the rate governor.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub page_size: u32,
    /// Pause after every successful per-item fetch.
    pub request_delay: Duration,
    /// Consecutive not-found identifiers that end an open-ended sequential run.
    pub open_range_miss_limit: u64,
    pub known_exceptions: BTreeSet<u64>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            request_delay: Duration::from_millis(500),
            open_range_miss_limit: 20,
            known_exceptions: DEFAULT_KNOWN_EXCEPTIONS.into_iter().collect(),
        }
    }
}

impl From<&MirrorConfig> for SyncOptions {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            page_size: config.page_size,
            request_delay: config.request_delay,
            open_range_miss_limit: config.open_range_miss_limit,
            known_exceptions: config.known_exceptions.clone(),
        }
    }
}

/// What one sync invocation should do.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncRequest {
    Recency {
        since: Option<DateTime<Utc>>,
        max_count: Option<u64>,
    },
    Sequential {
        start: u64,
        end: Option<u64>,
        max_count: Option<u64>,
    },
    GapPriority {
        max_count: Option<u64>,
    },
    StateCheck {
        cutoff: DateTime<Utc>,
        max_count: Option<u64>,
    },
}

impl SyncRequest {
    pub fn mode(&self) -> SyncMode {
        match self {
            SyncRequest::Recency { .. } => SyncMode::Recency,
            SyncRequest::Sequential { .. } => SyncMode::Sequential,
            SyncRequest::GapPriority { .. } => SyncMode::GapPriority,
            SyncRequest::StateCheck { .. } => SyncMode::StateCheck,
        }
    }
}

/// Counts of one sync run. Reported even when the run stops early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub mode: SyncMode,
    /// Entries created locally.
    pub collected: u64,
    /// Existing entries overwritten with new content.
    pub updated: u64,
    /// Fetched or checked entries whose content did not change.
    pub unchanged: u64,
    /// Listing items skipped because an entry already existed.
    pub skipped: u64,
    pub not_found: u64,
    /// Per-item transport failures tolerated by state-check.
    pub failed: u64,
    pub stopped: StopReason,
}

impl SyncOutcome {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            collected: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            not_found: 0,
            failed: 0,
            stopped: StopReason::Exhausted,
        }
    }

    fn record_write(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.collected += 1,
            WriteOutcome::Replaced => self.updated += 1,
            WriteOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// Entries fetched and written, changed or not.
    pub fn processed(&self) -> u64 {
        self.collected + self.updated + self.unchanged
    }

    pub fn run_info(&self, last_run: DateTime<Utc>) -> RunInfo {
        RunInfo {
            last_run,
            mode: self.mode,
            collected_count: self.collected,
            updated_count: self.updated,
            stopped: self.stopped,
            version: Some(crate::VERSION.to_string()),
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sync {}: {} collected, {} updated, {} unchanged, {} skipped, {} not found",
            self.mode,
            self.stopped.as_str(),
            self.collected,
            self.updated,
            self.unchanged,
            self.skipped,
            self.not_found
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        Ok(())
    }
}

/// Result of pushing one identifier through the pipeline.
enum ItemResult {
    Written(WriteOutcome),
    NotFound,
}

/// Orchestrates strategies over a remote source and a local store.
pub struct SyncEngine<'a, R: RemoteSource + ?Sized> {
    remote: &'a R,
    store: &'a LocalStore,
    governor: RateGovernor,
    options: SyncOptions,
    cancel: CancelToken,
    clock: fn() -> DateTime<Utc>,
}

impl<'a, R: RemoteSource + ?Sized> SyncEngine<'a, R> {
    pub fn new(
        remote: &'a R,
        store: &'a LocalStore,
        governor: RateGovernor,
        options: SyncOptions,
        cancel: CancelToken,
    ) -> Self {
        Self {
            remote,
            store,
            governor,
            options,
            cancel,
            clock: Utc::now,
        }
    }

    /// Replace the clock used for `collected_at` and the run record.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one strategy to completion, cancellation, cutoff or cap, then
    /// write the run record.
    pub fn run(&self, request: &SyncRequest) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::new(request.mode());
        tracing::info!(mode = %outcome.mode, "sync started");

        let result = match *request {
            SyncRequest::Recency { since, max_count } => {
                self.recency(since, max_count, &mut outcome)
            }
            SyncRequest::Sequential {
                start,
                end,
                max_count,
            } => self.sequential(start, end, max_count, &mut outcome),
            SyncRequest::GapPriority { max_count } => self.gap_priority(max_count, &mut outcome),
            SyncRequest::StateCheck { cutoff, max_count } => {
                self.state_check(cutoff, max_count, &mut outcome)
            }
        };

        outcome.stopped = match result {
            Ok(stop) => stop,
            Err(Error::Cancelled) => {
                tracing::warn!("sync cancelled, keeping partial progress");
                StopReason::Cancelled
            }
            Err(e) => return Err(e),
        };

        self.store.write_run_info(&outcome.run_info((self.clock)()))?;
        tracing::info!(%outcome, "sync finished");
        Ok(outcome)
    }

    fn recency(
        &self,
        since: Option<DateTime<Utc>>,
        max_count: Option<u64>,
        outcome: &mut SyncOutcome,
    ) -> Result<StopReason> {
        if reached(max_count, 0) {
            return Ok(StopReason::MaxCount);
        }

        let mut page = 1;
        loop {
            self.governor.gate(self.remote)?;
            let items = self
                .remote
                .list_page(&PageQuery::updated_desc(self.options.page_size, page))?;
            if items.is_empty() {
                return Ok(StopReason::Exhausted);
            }

            for item in items {
                self.cancel.check()?;
                if since.is_some_and(|cutoff| item.updated_at < cutoff) {
                    tracing::info!(number = item.number, "reached recency cutoff");
                    return Ok(StopReason::Cutoff);
                }
                if self.store.exists(item.number) {
                    tracing::debug!(number = item.number, "already mirrored, skipping");
                    outcome.skipped += 1;
                    continue;
                }

                self.governor.gate(self.remote)?;
                match self.collect(item.number, None)? {
                    ItemResult::Written(written) => {
                        outcome.record_write(written);
                        if reached(max_count, outcome.collected) {
                            return Ok(StopReason::MaxCount);
                        }
                        self.pause()?;
                    }
                    ItemResult::NotFound => outcome.not_found += 1,
                }
            }
            page += 1;
        }
    }

    fn sequential(
        &self,
        start: u64,
        end: Option<u64>,
        max_count: Option<u64>,
        outcome: &mut SyncOutcome,
    ) -> Result<StopReason> {
        if start == 0 {
            return Err(Error::InvalidInput(
                "sequential range must start at 1 or above".to_string(),
            ));
        }
        if reached(max_count, 0) {
            return Ok(StopReason::MaxCount);
        }

        let mut misses = 0;
        let mut number = start;
        while end.is_none_or(|end| number <= end) {
            self.cancel.check()?;
            self.governor.gate(self.remote)?;
            match self.collect(number, None)? {
                ItemResult::Written(written) => {
                    misses = 0;
                    outcome.record_write(written);
                    if reached(max_count, outcome.processed()) {
                        return Ok(StopReason::MaxCount);
                    }
                    self.pause()?;
                }
                ItemResult::NotFound => {
                    outcome.not_found += 1;
                    misses += 1;
                    if end.is_none() && misses >= self.options.open_range_miss_limit {
                        tracing::info!(
                            last = number,
                            misses,
                            "open range ended after consecutive missing identifiers"
                        );
                        return Ok(StopReason::Exhausted);
                    }
                }
            }
            number += 1;
        }
        Ok(StopReason::Exhausted)
    }

    fn gap_priority(&self, max_count: Option<u64>, outcome: &mut SyncOutcome) -> Result<StopReason> {
        self.governor.gate(self.remote)?;
        let report =
            GapDetector::new(self.remote, self.store, &self.options.known_exceptions).detect()?;
        tracing::info!(missing = report.missing.len(), "collecting missing identifiers");

        if reached(max_count, 0) {
            return Ok(StopReason::MaxCount);
        }
        for number in report.missing {
            self.cancel.check()?;
            self.governor.gate(self.remote)?;
            match self.collect(number, None)? {
                ItemResult::Written(written) => {
                    outcome.record_write(written);
                    if reached(max_count, outcome.collected) {
                        return Ok(StopReason::MaxCount);
                    }
                    self.pause()?;
                }
                ItemResult::NotFound => outcome.not_found += 1,
            }
        }
        Ok(StopReason::Exhausted)
    }

    fn state_check(
        &self,
        cutoff: DateTime<Utc>,
        max_count: Option<u64>,
        outcome: &mut SyncOutcome,
    ) -> Result<StopReason> {
        if reached(max_count, 0) {
            return Ok(StopReason::MaxCount);
        }

        let detector = ChangeDetector::new(self.remote);
        let mut page = 1;
        loop {
            self.governor.gate(self.remote)?;
            let items = self
                .remote
                .list_page(&PageQuery::updated_desc(self.options.page_size, page))?;
            if items.is_empty() {
                return Ok(StopReason::Exhausted);
            }

            for item in items {
                self.cancel.check()?;
                if item.updated_at < cutoff {
                    tracing::info!(number = item.number, "reached state-check cutoff");
                    return Ok(StopReason::Cutoff);
                }

                self.governor.gate(self.remote)?;
                let local = self.store.load(item.number)?;
                let assessment = detector.assess(item.number, &local);
                match &assessment.verdict {
                    Verdict::Unchanged => {
                        outcome.unchanged += 1;
                        self.pause()?;
                        continue;
                    }
                    Verdict::RemoteNotFound => {
                        outcome.not_found += 1;
                        continue;
                    }
                    Verdict::Changed(fields) => {
                        tracing::info!(number = item.number, ?fields, "stale entry");
                    }
                    Verdict::IncompleteLocal(reason) => {
                        tracing::warn!(number = item.number, %reason, "incomplete local entry");
                    }
                    Verdict::NoLocalEntry | Verdict::RemoteUnavailable(_) => {}
                }

                match self.collect(item.number, assessment.remote) {
                    Ok(ItemResult::Written(written)) => {
                        outcome.record_write(written);
                        if reached(max_count, outcome.collected + outcome.updated) {
                            return Ok(StopReason::MaxCount);
                        }
                        self.pause()?;
                    }
                    Ok(ItemResult::NotFound) => outcome.not_found += 1,
                    Err(Error::Transport(msg)) => {
                        tracing::warn!(number = item.number, error = %msg, "refresh failed");
                        outcome.failed += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            page += 1;
        }
    }

    /// Fetch, assemble and write one identifier. `prefetched` skips the
    /// detail call when the caller already holds a fresh detail.
    fn collect(&self, number: u64, prefetched: Option<PullDetail>) -> Result<ItemResult> {
        match self.fetch_record(number, prefetched)? {
            Some(record) => {
                if let Some(violation) = record.lifecycle_violation() {
                    tracing::warn!(number, violation, "remote record violates lifecycle order");
                }
                let written = self.store.write(&record)?;
                tracing::info!(number, outcome = ?written, "mirrored");
                Ok(ItemResult::Written(written))
            }
            None => {
                tracing::info!(number, "not found remotely, skipping");
                Ok(ItemResult::NotFound)
            }
        }
    }

    /// `Ok(None)` when the identifier does not exist remotely.
    fn fetch_record(&self, number: u64, prefetched: Option<PullDetail>) -> Result<Option<Record>> {
        let detail = match prefetched {
            Some(detail) => detail,
            None => match self.remote.get_detail(number) {
                Ok(detail) => detail,
                Err(FetchError::NotFound) => return Ok(None),
                Err(e) => return Err(e.into()),
            },
        };

        let mut record = assemble_record(detail, (self.clock)());
        record.comments = self.sub_resource(number, SubResourceKind::Comments)?;
        record.review_comments = self.sub_resource(number, SubResourceKind::ReviewComments)?;
        record.files = self.sub_resource(number, SubResourceKind::Files)?;
        record.commits = self.sub_resource(number, SubResourceKind::Commits)?;
        Ok(Some(record))
    }

    /// A sub-resource that vanished after the detail was fetched is stored empty.
    fn sub_resource(&self, number: u64, kind: SubResourceKind) -> Result<Vec<serde_json::Value>> {
        match self.remote.get_sub_resource(number, kind) {
            Ok(items) => Ok(items),
            Err(FetchError::NotFound) => {
                tracing::warn!(number, kind = kind.as_str(), "sub-resource not found, storing empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn pause(&self) -> Result<()> {
        self.cancel.sleep(self.options.request_delay)
    }
}

/// Build a record from a detail with empty sub-resource lists.
pub fn assemble_record(detail: PullDetail, collected_at: DateTime<Utc>) -> Record {
    Record {
        basic_info: BasicInfo {
            number: detail.number,
            title: detail.title,
            state: Some(detail.state),
            created_at: Some(detail.created_at),
            updated_at: Some(detail.updated_at),
            closed_at: detail.closed_at,
            merged_at: detail.merged_at,
            html_url: detail.html_url,
            user: detail.user,
        },
        labels: dedup_labels(detail.labels),
        comments: Vec::new(),
        review_comments: Vec::new(),
        files: Vec::new(),
        commits: Vec::new(),
        collected_at: Some(collected_at),
    }
}

fn reached(max_count: Option<u64>, count: u64) -> bool {
    max_count.is_some_and(|max| count >= max)
}
