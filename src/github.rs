//! GitHub REST implementation of [`RemoteSource`].
//!
//! Blocking `ureq` calls, one at a time. Status codes are mapped to
//! [`FetchError`] here and nowhere else: 404 and 410 mean the identifier does
//! not exist, everything else is a transport failure.

use std::time::Duration;

use chrono::DateTime;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::{MirrorConfig, Repository};
use crate::remote::{
    FetchError, IssueProbe, PageQuery, PullDetail, PullSummary, RateBudget, RemoteSource,
    SubResourceKind,
};

/// User-Agent header required by GitHub API
const USER_AGENT: &str = concat!("pr-mirror/", env!("CARGO_PKG_VERSION"));

/// Page size for sub-resource lists.
const SUB_RESOURCE_PAGE_SIZE: usize = 100;

/// Upper bound on pages fetched for one sub-resource list.
const SUB_RESOURCE_MAX_PAGES: u32 = 30;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response from GET /rate_limit (only the core bucket).
#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    rate: RateLimitBucket,
}

#[derive(Debug, Deserialize)]
struct RateLimitBucket {
    limit: u64,
    remaining: u64,
    /// Unix timestamp
    reset: i64,
}

/// Response from GET /issues/{n} (only the fields we care about).
#[derive(Debug, Deserialize)]
struct IssueResponse {
    #[serde(default)]
    title: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

/// Client for one repository.
pub struct GithubClient {
    agent: ureq::Agent,
    api_base_url: String,
    repository: Repository,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(api_base_url: impl Into<String>, repository: Repository, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            repository,
            token,
        }
    }

    /// Build a client from resolved configuration.
    pub fn from_config(config: &MirrorConfig) -> crate::Result<Self> {
        let repository = config.require_repository()?.clone();
        if config.token.is_none() {
            tracing::warn!("no GITHUB_TOKEN set, unauthenticated rate limits apply");
        }
        Ok(Self::new(
            config.api_base_url.clone(),
            repository,
            config.token.clone(),
        ))
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_base_url, self.repository.owner, self.repository.name, path
        )
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T, FetchError> {
        tracing::debug!(url, ?query, "GET");
        let mut request = self
            .agent
            .get(url)
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", "2022-11-28");
        if let Some(ref token) = self.token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        for (key, value) in query {
            request = request.query(key, value);
        }

        match request.call() {
            Ok(resp) => resp
                .into_json()
                .map_err(|e| FetchError::Transport(format!("invalid response from {}: {}", url, e))),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(status_error(code, &body))
            }
            Err(e) => Err(FetchError::Transport(e.to_string())),
        }
    }

    /// Fetch every page of a list endpoint.
    fn get_all_pages(&self, url: &str) -> Result<Vec<serde_json::Value>, FetchError> {
        let mut items = Vec::new();
        for page in 1..=SUB_RESOURCE_MAX_PAGES {
            let batch: Vec<serde_json::Value> = self.get_json(
                url,
                &[
                    ("per_page", SUB_RESOURCE_PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                ],
            )?;
            let last = batch.len() < SUB_RESOURCE_PAGE_SIZE;
            items.extend(batch);
            if last {
                return Ok(items);
            }
        }
        tracing::warn!(url, pages = SUB_RESOURCE_MAX_PAGES, "sub-resource list truncated");
        Ok(items)
    }
}

/// Map an HTTP error status to the fetch taxonomy.
fn status_error(code: u16, body: &str) -> FetchError {
    match code {
        404 | 410 => FetchError::NotFound,
        _ => {
            let detail: String = body.trim().chars().take(200).collect();
            FetchError::Transport(format!("HTTP {}: {}", code, detail))
        }
    }
}

impl RemoteSource for GithubClient {
    fn list_page(&self, query: &PageQuery) -> Result<Vec<PullSummary>, FetchError> {
        self.get_json(
            &self.repo_url("/pulls"),
            &[
                ("state", "all".to_string()),
                ("sort", query.sort.as_str().to_string()),
                ("direction", query.direction.as_str().to_string()),
                ("per_page", query.per_page.to_string()),
                ("page", query.page.to_string()),
            ],
        )
    }

    fn get_detail(&self, number: u64) -> Result<PullDetail, FetchError> {
        self.get_json(&self.repo_url(&format!("/pulls/{}", number)), &[])
    }

    fn get_sub_resource(
        &self,
        number: u64,
        kind: SubResourceKind,
    ) -> Result<Vec<serde_json::Value>, FetchError> {
        let path = match kind {
            // Conversation comments live in the issue namespace.
            SubResourceKind::Comments => format!("/issues/{}/comments", number),
            SubResourceKind::ReviewComments => format!("/pulls/{}/comments", number),
            SubResourceKind::Files => format!("/pulls/{}/files", number),
            SubResourceKind::Commits => format!("/pulls/{}/commits", number),
        };
        self.get_all_pages(&self.repo_url(&path))
    }

    fn rate_budget(&self) -> Result<RateBudget, FetchError> {
        let url = format!("{}/rate_limit", self.api_base_url);
        let resp: RateLimitResponse = self.get_json(&url, &[])?;
        let reset_at = DateTime::from_timestamp(resp.rate.reset, 0).ok_or_else(|| {
            FetchError::Transport(format!("invalid reset timestamp {}", resp.rate.reset))
        })?;
        Ok(RateBudget {
            limit: resp.rate.limit,
            remaining: resp.rate.remaining,
            reset_at,
        })
    }

    fn probe_issue(&self, number: u64) -> Result<IssueProbe, FetchError> {
        let issue: IssueResponse = self.get_json(&self.repo_url(&format!("/issues/{}", number)), &[])?;
        if issue.pull_request.is_some() {
            Ok(IssueProbe::PullRequest)
        } else {
            Ok(IssueProbe::Issue {
                title: issue.title,
                state: issue.state,
            })
        }
    }
}
