//! Data models for mirrored pull requests.
//!
//! This module defines the core data structures:
//! - `Record` - One mirrored pull request as stored in its local file
//! - `BasicInfo` - Lifecycle fields and ownership of a record
//! - `Label` / `Actor` - Name-bearing objects kept verbatim from the remote
//! - `DerivedState` - open / closed / merged as used by aggregates
//! - `RunInfo` - Summary of one sync invocation

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Raw lifecycle state reported by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
}

impl PrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrState::Open => "open",
            PrState::Closed => "closed",
        }
    }
}

impl fmt::Display for PrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State used for aggregation. A merge timestamp takes precedence over
/// the raw `closed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivedState {
    Open,
    Closed,
    Merged,
}

impl DerivedState {
    /// Report order.
    pub const ALL: [DerivedState; 3] = [DerivedState::Open, DerivedState::Closed, DerivedState::Merged];

    pub fn derive(state: Option<PrState>, merged_at: Option<&DateTime<Utc>>) -> Option<Self> {
        if merged_at.is_some() {
            return Some(DerivedState::Merged);
        }
        state.map(|s| match s {
            PrState::Open => DerivedState::Open,
            PrState::Closed => DerivedState::Closed,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedState::Open => "open",
            DerivedState::Closed => "closed",
            DerivedState::Merged => "merged",
        }
    }
}

impl fmt::Display for DerivedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Owning actor of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub login: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
}

/// A label as returned by the remote. Only `name` is interpreted; every
/// other field is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Label {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Drop labels whose name was already seen, keeping first occurrence order.
pub fn dedup_labels(labels: Vec<Label>) -> Vec<Label> {
    let mut seen = BTreeSet::new();
    labels
        .into_iter()
        .filter(|l| seen.insert(l.name.clone()))
        .collect()
}

/// The `basic_info` block of a record file.
///
/// `state` and `updated_at` are optional so that incomplete files can still
/// be read and reported as stale instead of failing the whole read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: Option<PrState>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub user: Option<Actor>,
}

/// One mirrored pull request, serialized as one file per identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub basic_info: BasicInfo,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub comments: Vec<serde_json::Value>,
    #[serde(default)]
    pub review_comments: Vec<serde_json::Value>,
    #[serde(default)]
    pub files: Vec<serde_json::Value>,
    #[serde(default)]
    pub commits: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient_timestamp::option")]
    pub collected_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn number(&self) -> u64 {
        self.basic_info.number
    }

    pub fn derived_state(&self) -> Option<DerivedState> {
        DerivedState::derive(self.basic_info.state, self.basic_info.merged_at.as_ref())
    }

    pub fn label_names(&self) -> BTreeSet<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }

    /// Missing fields that make this entry unusable for change detection.
    pub fn missing_required(&self) -> Option<&'static str> {
        if self.basic_info.state.is_none() {
            Some("state")
        } else if self.basic_info.updated_at.is_none() {
            Some("updated_at")
        } else {
            None
        }
    }

    /// Check merged-implies-closed-implies-state-closed and its converse for
    /// open records.
    pub fn lifecycle_violation(&self) -> Option<&'static str> {
        let info = &self.basic_info;
        if info.merged_at.is_some() && info.closed_at.is_none() {
            return Some("merged_at set without closed_at");
        }
        match info.state {
            Some(PrState::Open) if info.closed_at.is_some() || info.merged_at.is_some() => {
                Some("open record carries closed_at or merged_at")
            }
            Some(PrState::Closed) if info.closed_at.is_none() => Some("closed record without closed_at"),
            _ => None,
        }
    }

    /// Equal in everything except the collection timestamp.
    pub fn same_content(&self, other: &Record) -> bool {
        self.basic_info == other.basic_info
            && self.labels == other.labels
            && self.comments == other.comments
            && self.review_comments == other.review_comments
            && self.files == other.files
            && self.commits == other.commits
    }
}

/// Sync strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Recency-ordered pass that fills identifiers with no local entry
    #[serde(alias = "update")]
    Recency,
    /// Forced re-fetch of an identifier range
    Sequential,
    /// Fetch exactly the identifiers the gap detector reports missing
    #[serde(alias = "uncollected")]
    GapPriority,
    /// Recency-ordered pass that refreshes stale entries
    StateCheck,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Recency => "recency",
            SyncMode::Sequential => "sequential",
            SyncMode::GapPriority => "gap-priority",
            SyncMode::StateCheck => "state-check",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a sync run stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// The strategy ran out of work
    #[default]
    Exhausted,
    /// An item older than the recency cutoff was reached
    Cutoff,
    /// The caller-supplied maximum count was reached
    MaxCount,
    /// An operator stop was observed
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Exhausted => "exhausted",
            StopReason::Cutoff => "cutoff",
            StopReason::MaxCount => "max-count",
            StopReason::Cancelled => "cancelled",
        }
    }
}

/// Write-once summary of one sync invocation (`last_run_info.json`).
///
/// Not used for resuming; resumption relies on entry existence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    #[serde(deserialize_with = "lenient_timestamp::required")]
    pub last_run: DateTime<Utc>,
    pub mode: SyncMode,
    pub collected_count: u64,
    #[serde(default)]
    pub updated_count: u64,
    #[serde(default)]
    pub stopped: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Timestamps written by this tool carry an offset; older mirrors wrote local
/// time without one. Offset-less values are read as UTC.
mod lenient_timestamp {
    use super::*;

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn option<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw))),
        }
    }

    pub fn required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn record_json(basic: serde_json::Value) -> Record {
        serde_json::from_value(serde_json::json!({ "basic_info": basic })).unwrap()
    }

    #[test]
    fn test_derived_state_merge_takes_precedence() {
        let merged = ts("2025-06-05T15:30:00Z");
        assert_eq!(
            DerivedState::derive(Some(PrState::Closed), Some(&merged)),
            Some(DerivedState::Merged)
        );
        assert_eq!(
            DerivedState::derive(Some(PrState::Closed), None),
            Some(DerivedState::Closed)
        );
        assert_eq!(DerivedState::derive(Some(PrState::Open), None), Some(DerivedState::Open));
        assert_eq!(DerivedState::derive(None, None), None);
    }

    #[test]
    fn test_record_reads_incomplete_basic_info() {
        let record = record_json(serde_json::json!({ "number": 7 }));
        assert_eq!(record.number(), 7);
        assert_eq!(record.missing_required(), Some("state"));

        let record = record_json(serde_json::json!({ "number": 7, "state": "open" }));
        assert_eq!(record.missing_required(), Some("updated_at"));
    }

    #[test]
    fn test_record_file_layout_keys() {
        let record = record_json(serde_json::json!({
            "number": 3,
            "state": "open",
            "updated_at": "2025-06-01T10:00:00Z"
        }));
        let value = serde_json::to_value(&record).unwrap();
        for key in [
            "basic_info",
            "labels",
            "comments",
            "review_comments",
            "files",
            "commits",
            "collected_at",
        ] {
            assert!(value.get(key).is_some(), "missing key {}", key);
        }
        assert_eq!(value["basic_info"]["updated_at"], "2025-06-01T10:00:00Z");
        assert!(value["basic_info"]["merged_at"].is_null());
    }

    #[test]
    fn test_label_keeps_extra_fields() {
        let label: Label =
            serde_json::from_str(r#"{"id": 9, "name": "bug", "color": "ff0000"}"#).unwrap();
        assert_eq!(label.name, "bug");
        let back = serde_json::to_value(&label).unwrap();
        assert_eq!(back["color"], "ff0000");
        assert_eq!(back["id"], 9);
    }

    #[test]
    fn test_dedup_labels_is_name_unique() {
        let labels = vec![Label::named("a"), Label::named("b"), Label::named("a")];
        let names: Vec<_> = dedup_labels(labels).into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_lifecycle_violation() {
        let ok = record_json(serde_json::json!({
            "number": 1,
            "state": "closed",
            "closed_at": "2025-06-05T15:30:00Z",
            "merged_at": "2025-06-05T15:30:00Z"
        }));
        assert_eq!(ok.lifecycle_violation(), None);

        let open_merged = record_json(serde_json::json!({
            "number": 1,
            "state": "open",
            "closed_at": "2025-06-05T15:30:00Z",
            "merged_at": "2025-06-05T15:30:00Z"
        }));
        assert!(open_merged.lifecycle_violation().is_some());

        let merged_not_closed = record_json(serde_json::json!({
            "number": 1,
            "state": "closed",
            "merged_at": "2025-06-05T15:30:00Z"
        }));
        assert!(merged_not_closed.lifecycle_violation().is_some());
    }

    #[test]
    fn test_same_content_ignores_collected_at() {
        let mut a = record_json(serde_json::json!({ "number": 1, "state": "open" }));
        let mut b = a.clone();
        a.collected_at = Some(ts("2025-01-01T00:00:00Z"));
        b.collected_at = Some(ts("2025-02-01T00:00:00Z"));
        assert!(a.same_content(&b));
        b.labels.push(Label::named("x"));
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_record_reads_offsetless_collected_at() {
        let record: Record = serde_json::from_value(serde_json::json!({
            "basic_info": {
                "number": 12,
                "state": "closed",
                "updated_at": "2025-06-01T08:00:00Z",
                "closed_at": "2025-06-01T08:00:00Z",
                "merged_at": "2025-06-01T08:00:00Z"
            },
            "labels": [{ "name": "docs", "color": "0075ca" }],
            "comments": [],
            "review_comments": [],
            "files": [],
            "commits": [],
            "collected_at": "2025-06-02T09:15:30.123456"
        }))
        .unwrap();
        assert_eq!(record.derived_state(), Some(DerivedState::Merged));
        assert_eq!(
            record.collected_at,
            Some(ts("2025-06-02T09:15:30.123456Z"))
        );

        let seconds_only: Record = serde_json::from_value(serde_json::json!({
            "basic_info": { "number": 1 },
            "collected_at": "2025-06-02T09:15:30"
        }))
        .unwrap();
        assert_eq!(seconds_only.collected_at, Some(ts("2025-06-02T09:15:30Z")));

        let null: Record = serde_json::from_value(serde_json::json!({
            "basic_info": { "number": 1 },
            "collected_at": null
        }))
        .unwrap();
        assert_eq!(null.collected_at, None);

        let garbage = serde_json::from_value::<Record>(serde_json::json!({
            "basic_info": { "number": 1 },
            "collected_at": "last tuesday"
        }));
        assert!(garbage.is_err());
    }

    #[test]
    fn test_run_info_reads_older_layout() {
        let info: RunInfo = serde_json::from_str(
            r#"{"last_run": "2025-06-02T09:15:30.5", "mode": "uncollected", "collected_count": 4}"#,
        )
        .unwrap();
        assert_eq!(info.last_run, ts("2025-06-02T09:15:30.5Z"));
        assert_eq!(info.mode, SyncMode::GapPriority);
        assert_eq!(info.collected_count, 4);
        assert_eq!(info.updated_count, 0);

        let update: RunInfo =
            serde_json::from_str(r#"{"last_run": "2025-06-02T09:15:30Z", "mode": "update", "collected_count": 1}"#)
                .unwrap();
        assert_eq!(update.mode, SyncMode::Recency);
    }

    #[test]
    fn test_run_info_serializes_mode_kebab_case() {
        let info = RunInfo {
            last_run: ts("2025-06-01T10:00:00Z"),
            mode: SyncMode::GapPriority,
            collected_count: 3,
            updated_count: 0,
            stopped: StopReason::MaxCount,
            version: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains(r#""mode":"gap-priority""#));
        assert!(json.contains(r#""stopped":"max-count""#));
    }
}
