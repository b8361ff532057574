//! Common test utilities for prm integration tests.
//!
//! Provides `TestEnv` for isolated test environments: a temporary working
//! directory with a `prm.kdl` and a `wiremock` fake of the GitHub REST API.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use assert_cmd::Command;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
pub use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// A pull request served by [`FakeGithub`].
#[derive(Debug, Clone)]
pub struct FakePull {
    pub number: u64,
    pub state: &'static str,
    pub merged: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub labels: Vec<String>,
}

impl FakePull {
    /// Open pull request created `number` hours after 2025-01-01.
    pub fn open(number: u64) -> Self {
        let created = base_time() + Duration::hours(number as i64);
        Self {
            number,
            state: "open",
            merged: false,
            created_at: created,
            updated_at: created,
            labels: Vec::new(),
        }
    }

    pub fn merged(number: u64) -> Self {
        Self {
            state: "closed",
            merged: true,
            ..Self::open(number)
        }
    }

    pub fn updated(mut self, at: &str) -> Self {
        self.updated_at = at.parse().unwrap();
        self
    }

    pub fn label(mut self, name: &str) -> Self {
        self.labels.push(name.to_string());
        self
    }

    fn to_json(&self) -> Value {
        let merged_at = self.merged.then(|| self.updated_at.to_rfc3339());
        json!({
            "number": self.number,
            "title": format!("PR {}", self.number),
            "state": self.state,
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at.to_rfc3339(),
            "closed_at": merged_at,
            "merged_at": merged_at,
            "html_url": format!("https://github.test/o/r/pull/{}", self.number),
            "user": { "login": format!("user{}", self.number % 3), "id": 1000 + self.number % 3 },
            "labels": self.labels.iter().map(|l| json!({ "name": l, "color": "ededed" })).collect::<Vec<_>>(),
        })
    }
}

pub fn base_time() -> DateTime<Utc> {
    "2025-01-01T00:00:00Z".parse().unwrap()
}

#[derive(Default)]
struct FakeState {
    pulls: BTreeMap<u64, FakePull>,
    issues: BTreeSet<u64>,
}

/// `wiremock` server answering the endpoints prm uses for `o/r`.
///
/// Pulls and issues live in shared state read by the mounted responders, so
/// fixtures can be added after [`start`](Self::start).
pub struct FakeGithub {
    server: MockServer,
    state: Arc<Mutex<FakeState>>,
}

impl FakeGithub {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(Mutex::new(FakeState::default()));

        let reset = (Utc::now() + Duration::hours(1)).timestamp();
        Mock::given(method("GET"))
            .and(path("/rate_limit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rate": { "limit": 5000, "remaining": 4999, "reset": reset, "used": 1 }
            })))
            .mount(&server)
            .await;

        let listing = Arc::clone(&state);
        Mock::given(method("GET"))
            .and(path("/repos/o/r/pulls"))
            .respond_with(move |req: &Request| list_pulls(&listing.lock().unwrap(), req))
            .mount(&server)
            .await;

        let details = Arc::clone(&state);
        Mock::given(method("GET"))
            .and(path_regex(r"^/repos/o/r/pulls/\d+$"))
            .respond_with(move |req: &Request| {
                let state = details.lock().unwrap();
                match state.pulls.get(&trailing_number(req)) {
                    Some(pull) => ResponseTemplate::new(200).set_body_json(pull.to_json()),
                    None => not_found(),
                }
            })
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path_regex(
                r"^/repos/o/r/(pulls/\d+/(comments|files|commits)|issues/\d+/comments)$",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let issues = Arc::clone(&state);
        Mock::given(method("GET"))
            .and(path_regex(r"^/repos/o/r/issues/\d+$"))
            .respond_with(move |req: &Request| {
                let state = issues.lock().unwrap();
                let n = trailing_number(req);
                if let Some(pull) = state.pulls.get(&n) {
                    ResponseTemplate::new(200).set_body_json(json!({
                        "title": format!("PR {}", n),
                        "state": pull.state,
                        "pull_request": {}
                    }))
                } else if state.issues.contains(&n) {
                    ResponseTemplate::new(200)
                        .set_body_json(json!({ "title": format!("Tracking {}", n), "state": "open" }))
                } else {
                    not_found()
                }
            })
            .mount(&server)
            .await;

        Self { server, state }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn add_pull(&self, pull: FakePull) {
        self.state.lock().unwrap().pulls.insert(pull.number, pull);
    }

    pub fn add_issue(&self, number: u64) {
        self.state.lock().unwrap().issues.insert(number);
    }

    /// Make the collection listing answer 503 from now on.
    pub async fn take_listing_down(&self) {
        Mock::given(method("GET"))
            .and(path("/repos/o/r/pulls"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(json!({ "message": "Service Unavailable" })),
            )
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Paths of every request received so far, in arrival order.
    pub async fn requested_paths(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|req| req.url.path().to_string())
            .collect()
    }
}

fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" }))
}

fn trailing_number(req: &Request) -> u64 {
    req.url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// One page of `GET /repos/o/r/pulls`, honouring sort, direction and paging.
fn list_pulls(state: &FakeState, req: &Request) -> ResponseTemplate {
    let params: BTreeMap<String, String> = req.url.query_pairs().into_owned().collect();
    let param = |key: &str| params.get(key).map(String::as_str);

    let mut pulls: Vec<&FakePull> = state.pulls.values().collect();
    if param("sort") == Some("updated") {
        pulls.sort_by(|a, b| (b.updated_at, b.number).cmp(&(a.updated_at, a.number)));
    } else {
        pulls.sort_by(|a, b| (b.created_at, b.number).cmp(&(a.created_at, a.number)));
    }
    if param("direction") == Some("asc") {
        pulls.reverse();
    }
    let per_page: usize = param("per_page").and_then(|v| v.parse().ok()).unwrap_or(30);
    let page: usize = param("page").and_then(|v| v.parse().ok()).unwrap_or(1);
    let items: Vec<Value> = pulls
        .into_iter()
        .skip(page.saturating_sub(1) * per_page)
        .take(per_page)
        .map(FakePull::to_json)
        .collect();
    ResponseTemplate::new(200).set_body_json(Value::Array(items))
}

/// A test environment with an isolated working directory and remote.
///
/// The working directory holds a `prm.kdl` pointing at the fake remote with
/// no request delay, so `prm()` needs no further flags.
pub struct TestEnv {
    pub work_dir: TempDir,
    pub github: FakeGithub,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(&[], "").await
    }

    /// Like [`new`](Self::new) with known exceptions and extra KDL nodes in
    /// `prm.kdl`.
    pub async fn with_config(exceptions: &[u64], extra: &str) -> Self {
        let env = Self {
            work_dir: TempDir::new().unwrap(),
            github: FakeGithub::start().await,
        };
        let exceptions: Vec<String> = exceptions.iter().map(|n| format!(" {}", n)).collect();
        let config = format!(
            "api-base-url \"{}\"\nrepository \"o/r\"\nrequest-delay-ms 0\nknown-exceptions{}\n{}\n",
            env.github.uri(),
            exceptions.concat(),
            extra
        );
        std::fs::write(env.work_dir.path().join("prm.kdl"), config).unwrap();
        env
    }

    /// Get a Command for the prm binary running in the working directory.
    pub fn prm(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_prm"));
        cmd.current_dir(self.work_dir.path());
        for var in ["PRM_CONFIG", "PRM_REPOSITORY", "PRM_DATA_DIR", "PRM_API_BASE_URL", "GITHUB_TOKEN", "RUST_LOG"] {
            cmd.env_remove(var);
        }
        cmd
    }

    pub fn path(&self) -> &Path {
        self.work_dir.path()
    }

    /// Default store location, relative to the working directory.
    pub fn data_path(&self) -> PathBuf {
        self.work_dir.path().join("data").join("prs")
    }

    pub fn entry(&self, number: u64) -> PathBuf {
        self.data_path().join(format!("{}.json", number))
    }

    pub fn read_entry(&self, number: u64) -> Value {
        serde_json::from_str(&std::fs::read_to_string(self.entry(number)).unwrap()).unwrap()
    }
}

/// Parse the JSON printed on stdout.
pub fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}
