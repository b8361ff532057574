//! Change detection for already-mirrored entries.
//!
//! An entry is stale when it is absent, incomplete, or when the remote's
//! state, last-update time or merge time differs from the stored one.

use serde::Serialize;

use crate::remote::{FetchError, PullDetail, RemoteSource};
use crate::storage::LocalEntry;

/// A compared field that differs between local and remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedField {
    State,
    UpdatedAt,
    MergedAt,
}

/// Outcome of comparing one local entry with the remote.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Nothing stored locally.
    NoLocalEntry,
    /// Stored entry is unreadable or lacks state / updated_at.
    IncompleteLocal(String),
    /// At least one compared field differs.
    Changed(Vec<ChangedField>),
    /// All compared fields are equal.
    Unchanged,
    /// The identifier does not exist remotely; nothing to update.
    RemoteNotFound,
    /// The remote fetch failed; assumed stale.
    RemoteUnavailable(String),
}

impl Verdict {
    pub fn needs_update(&self) -> bool {
        match self {
            Verdict::NoLocalEntry
            | Verdict::IncompleteLocal(_)
            | Verdict::Changed(_)
            | Verdict::RemoteUnavailable(_) => true,
            Verdict::Unchanged | Verdict::RemoteNotFound => false,
        }
    }
}

/// Verdict plus the remote detail fetched while deciding, so the caller
/// does not have to fetch it a second time.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub verdict: Verdict,
    pub remote: Option<PullDetail>,
}

/// Decides whether a local entry must be re-fetched.
pub struct ChangeDetector<'a, R: RemoteSource + ?Sized> {
    remote: &'a R,
}

impl<'a, R: RemoteSource + ?Sized> ChangeDetector<'a, R> {
    pub fn new(remote: &'a R) -> Self {
        Self { remote }
    }

    /// True when the entry for `number` should be re-fetched and overwritten.
    pub fn needs_update(&self, number: u64, local: &LocalEntry) -> bool {
        self.assess(number, local).verdict.needs_update()
    }

    /// Full decision. Absent and incomplete entries are decided without a
    /// remote call.
    pub fn assess(&self, number: u64, local: &LocalEntry) -> Assessment {
        let record = match local {
            LocalEntry::Absent => return decided(Verdict::NoLocalEntry),
            LocalEntry::Unreadable(reason) => {
                return decided(Verdict::IncompleteLocal(reason.clone()));
            }
            LocalEntry::Present(record) => record,
        };
        if let Some(field) = record.missing_required() {
            return decided(Verdict::IncompleteLocal(format!("missing {}", field)));
        }

        let remote = match self.remote.get_detail(number) {
            Ok(detail) => detail,
            Err(FetchError::NotFound) => return decided(Verdict::RemoteNotFound),
            Err(FetchError::Transport(msg)) => {
                tracing::warn!(number, error = %msg, "state check failed, assuming stale");
                return decided(Verdict::RemoteUnavailable(msg));
            }
        };

        let local = &record.basic_info;
        let mut changed = Vec::new();
        if local.state != Some(remote.state) {
            changed.push(ChangedField::State);
        }
        if local.updated_at != Some(remote.updated_at) {
            changed.push(ChangedField::UpdatedAt);
        }
        if local.merged_at != remote.merged_at {
            changed.push(ChangedField::MergedAt);
        }

        let verdict = if changed.is_empty() {
            Verdict::Unchanged
        } else {
            Verdict::Changed(changed)
        };
        Assessment {
            verdict,
            remote: Some(remote),
        }
    }
}

fn decided(verdict: Verdict) -> Assessment {
    Assessment {
        verdict,
        remote: None,
    }
}
