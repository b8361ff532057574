//! Remote source contract.
//!
//! The sync engine, change detector, gap detector and reconciler only talk to
//! the remote through [`RemoteSource`]. Every call returns a tagged
//! [`FetchError`] so callers can tell "this identifier does not exist" apart
//! from "the transport broke" without looking at status codes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Actor, Label, PrState};

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The identifier does not exist remotely (404-equivalent).
    #[error("not found")]
    NotFound,

    /// Network, authentication or unexpected-response failure.
    #[error("{0}")]
    Transport(String),
}

impl From<FetchError> for crate::Error {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound => crate::Error::NotFound("remote resource".to_string()),
            FetchError::Transport(msg) => crate::Error::Transport(msg),
        }
    }
}

/// Sort key for listing pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Created,
    Updated,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Created => "created",
            SortKey::Updated => "updated",
        }
    }
}

/// Sort direction for listing pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// One page request. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub sort: SortKey,
    pub direction: Direction,
    pub per_page: u32,
    pub page: u32,
}

impl PageQuery {
    /// Most recently updated first.
    pub fn updated_desc(per_page: u32, page: u32) -> Self {
        Self {
            sort: SortKey::Updated,
            direction: Direction::Desc,
            per_page,
            page,
        }
    }

    /// Most recently created first.
    pub fn created_desc(per_page: u32, page: u32) -> Self {
        Self {
            sort: SortKey::Created,
            direction: Direction::Desc,
            per_page,
            page,
        }
    }

    pub fn descending(&self) -> bool {
        self.direction == Direction::Desc
    }
}

/// A listing entry. Only the fields the engine and the aggregates need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullSummary {
    pub number: u64,
    pub state: PrState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<Actor>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// The full detail of one pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullDetail {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    pub state: PrState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub user: Option<Actor>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl From<&PullDetail> for PullSummary {
    fn from(detail: &PullDetail) -> Self {
        Self {
            number: detail.number,
            state: detail.state,
            created_at: detail.created_at,
            updated_at: detail.updated_at,
            merged_at: detail.merged_at,
            user: detail.user.clone(),
            labels: detail.labels.clone(),
        }
    }
}

/// Per-item sub-resources fetched alongside the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubResourceKind {
    Comments,
    ReviewComments,
    Files,
    Commits,
}

impl SubResourceKind {
    pub const ALL: [SubResourceKind; 4] = [
        SubResourceKind::Comments,
        SubResourceKind::ReviewComments,
        SubResourceKind::Files,
        SubResourceKind::Commits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubResourceKind::Comments => "comments",
            SubResourceKind::ReviewComments => "review_comments",
            SubResourceKind::Files => "files",
            SubResourceKind::Commits => "commits",
        }
    }
}

/// Remaining request budget and when it resets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBudget {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// What an identifier is in the shared issue/pull-request numbering space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueProbe {
    /// A tracking issue (cross-numbered entity).
    Issue { title: String, state: String },
    /// A pull request, reachable through the issue namespace too.
    PullRequest,
}

/// Narrow contract over the code-hosting API.
///
/// Calls are issued one at a time; implementations need not support
/// concurrent budget accounting.
pub trait RemoteSource {
    /// Fetch one page of the listing (all states).
    fn list_page(&self, query: &PageQuery) -> Result<Vec<PullSummary>, FetchError>;

    /// Fetch one pull request's detail.
    fn get_detail(&self, number: u64) -> Result<PullDetail, FetchError>;

    /// Fetch one sub-resource list of a pull request, stored verbatim.
    fn get_sub_resource(
        &self,
        number: u64,
        kind: SubResourceKind,
    ) -> Result<Vec<serde_json::Value>, FetchError>;

    /// Current request budget.
    fn rate_budget(&self) -> Result<RateBudget, FetchError>;

    /// Look an identifier up in the issue namespace. `NotFound` means the
    /// number is unused by either entity class.
    fn probe_issue(&self, number: u64) -> Result<IssueProbe, FetchError>;
}
