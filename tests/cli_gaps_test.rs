//! Integration tests for `prm gaps` and `prm status`.

mod common;

use common::{FakePull, TestEnv, stdout_json};
use predicates::prelude::*;

/// Remote has 1-6 with #4 a tracking issue; local holds 1, 2 and 5.
async fn partial_env() -> TestEnv {
    let env = TestEnv::with_config(&[4], "").await;
    for n in [1, 2, 3, 5, 6] {
        env.github.add_pull(FakePull::open(n));
    }
    env.github.add_issue(4);
    env.prm()
        .args(["sync", "--mode", "sequential", "--end", "2"])
        .assert()
        .success();
    env.prm()
        .args(["sync", "--mode", "sequential", "--start", "5", "--end", "5"])
        .assert()
        .success();
    env
}

#[tokio::test]
async fn test_gaps_report() {
    let env = partial_env().await;
    let output = env.prm().arg("gaps").output().unwrap();
    assert!(output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["max_known"], 6);
    assert_eq!(json["max_source"], "remote");
    assert_eq!(json["local_count"], 3);
    assert_eq!(json["missing_count"], 2);
    assert_eq!(json["ranges"], serde_json::json!(["#3", "#6"]));
    assert_eq!(json["recent_missing"], serde_json::json!([3, 6]));
    assert_eq!(json["exceptions_in_range"], 1);
    assert_eq!(json["coverage"]["effective_missing"], 2);
    assert!(json.get("probe").is_none());
}

#[tokio::test]
async fn test_gaps_probe_classifies_identifiers() {
    let env = partial_env().await;
    let output = env.prm().args(["gaps", "--probe"]).output().unwrap();
    let json = stdout_json(&output);

    assert_eq!(json["probe"]["cross_numbered"], serde_json::json!([4]));
    assert_eq!(json["probe"]["pull_requests"], serde_json::json!([3, 6]));
    assert_eq!(json["probe"]["absent"], serde_json::json!([]));
    let paths = env.github.requested_paths().await;
    assert!(paths.iter().any(|r| r == "/repos/o/r/issues/4"));
}

#[tokio::test]
async fn test_gaps_human() {
    let env = partial_env().await;
    env.prm()
        .args(["gaps", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Highest identifier: 6 (remote)"))
        .stdout(predicate::str::contains("Missing: 2"))
        .stdout(predicate::str::contains("#3"));
}

#[tokio::test]
async fn test_gaps_falls_back_to_local_maximum() {
    let env = partial_env().await;
    env.github.take_listing_down().await;
    let output = env.prm().arg("gaps").output().unwrap();
    assert!(output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["max_known"], 5);
    assert_eq!(json["max_source"], "local_fallback");
    assert_eq!(json["ranges"], serde_json::json!(["#3"]));
}

#[tokio::test]
async fn test_status_after_sync() {
    let env = partial_env().await;
    let output = env.prm().arg("status").output().unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["entries"], 3);
    assert_eq!(json["states"]["open"], 3);
    assert_eq!(json["last_run"]["mode"], "sequential");
    assert_eq!(json["last_run"]["collected_count"], 1);
}
