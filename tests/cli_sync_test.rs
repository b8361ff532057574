//! Integration tests for `prm sync` against a local fake remote.
//!
//! Covers every mode:
//! - `recency` collects newest-updated items and skips existing entries
//! - `sequential` walks an identifier range
//! - `gap-priority` fills only missing identifiers
//! - `state-check` refreshes stale entries

mod common;

use common::{FakePull, TestEnv, stdout_json};
use predicates::prelude::*;

async fn env_with_pulls(numbers: &[u64]) -> TestEnv {
    let env = TestEnv::new().await;
    for &n in numbers {
        env.github.add_pull(FakePull::open(n));
    }
    env
}

// === Recency ===

#[tokio::test]
async fn test_recency_collects_everything() {
    let env = env_with_pulls(&[1, 2, 3]).await;
    env.github.add_pull(FakePull::merged(4).label("policy"));

    let output = env.prm().arg("sync").output().unwrap();
    assert!(output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["mode"], "recency");
    assert_eq!(json["collected"], 4);
    assert_eq!(json["stopped"], "exhausted");

    for n in 1..=4 {
        assert!(env.entry(n).exists(), "entry {} missing", n);
    }
    let merged = env.read_entry(4);
    assert_eq!(merged["basic_info"]["number"], 4);
    assert_eq!(merged["basic_info"]["state"], "closed");
    assert!(merged["basic_info"]["merged_at"].is_string());
    assert_eq!(merged["labels"][0]["name"], "policy");
    assert_eq!(merged["labels"][0]["color"], "ededed");
    assert!(merged["commits"].as_array().unwrap().is_empty());

    let run_info: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(env.data_path().join("last_run_info.json")).unwrap())
            .unwrap();
    assert_eq!(run_info["mode"], "recency");
    assert_eq!(run_info["collected_count"], 4);
}

#[tokio::test]
async fn test_recency_rerun_skips_existing() {
    let env = env_with_pulls(&[1, 2, 3]).await;
    env.prm().arg("sync").assert().success();
    let before = std::fs::read(env.entry(2)).unwrap();

    let output = env.prm().arg("sync").output().unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["collected"], 0);
    assert_eq!(json["skipped"], 3);
    assert_eq!(std::fs::read(env.entry(2)).unwrap(), before);
}

#[tokio::test]
async fn test_recency_since_cutoff() {
    let env = TestEnv::new().await;
    env.github.add_pull(FakePull::open(1).updated("2025-03-01T00:00:00Z"));
    env.github.add_pull(FakePull::open(2).updated("2025-06-05T00:00:00Z"));
    env.github.add_pull(FakePull::open(3).updated("2025-06-10T00:00:00Z"));

    let output = env.prm().args(["sync", "--since", "2025-06-01"]).output().unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["collected"], 2);
    assert_eq!(json["stopped"], "cutoff");
    assert!(!env.entry(1).exists());
    assert!(env.entry(3).exists());
}

#[tokio::test]
async fn test_recency_max_count() {
    let env = env_with_pulls(&[1, 2, 3, 4, 5]).await;
    let output = env.prm().args(["sync", "--max-count", "2"]).output().unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["collected"], 2);
    assert_eq!(json["stopped"], "max-count");
    // Newest updated first.
    assert!(env.entry(5).exists());
    assert!(env.entry(4).exists());
    assert!(!env.entry(3).exists());
}

#[tokio::test]
async fn test_sync_output_dir() {
    let env = env_with_pulls(&[1]).await;
    env.prm()
        .args(["sync", "--output-dir", "elsewhere"])
        .assert()
        .success();
    assert!(env.path().join("elsewhere").join("1.json").exists());
    assert!(!env.entry(1).exists());
}

#[tokio::test]
async fn test_sync_human_output() {
    let env = env_with_pulls(&[1, 2]).await;
    env.prm()
        .args(["sync", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sync (recency) exhausted"))
        .stdout(predicate::str::contains("Collected: 2"));
}

// === Sequential ===

#[tokio::test]
async fn test_sequential_bounded_range() {
    let env = env_with_pulls(&[1, 2, 4, 5]).await;
    let output = env
        .prm()
        .args(["sync", "--mode", "sequential", "--start", "2", "--end", "4"])
        .output()
        .unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["collected"], 2);
    assert_eq!(json["not_found"], 1);
    assert!(!env.entry(1).exists());
    assert!(env.entry(2).exists());
    assert!(env.entry(4).exists());
    assert!(!env.entry(5).exists());
}

#[tokio::test]
async fn test_sequential_open_range_stops_after_misses() {
    let env = TestEnv::with_config(&[], "open-range-miss-limit 3").await;
    for n in [1, 2, 3] {
        env.github.add_pull(FakePull::open(n));
    }
    let output = env.prm().args(["sync", "--mode", "sequential"]).output().unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["collected"], 3);
    assert_eq!(json["not_found"], 3);
    assert_eq!(json["stopped"], "exhausted");
}

#[tokio::test]
async fn test_sequential_inverted_range_rejected() {
    let env = env_with_pulls(&[1]).await;
    env.prm()
        .args(["sync", "--mode", "sequential", "--start", "5", "--end", "2"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("below --start"));
}

// === Gap priority ===

#[tokio::test]
async fn test_gap_priority_fills_missing_only() {
    let env = TestEnv::with_config(&[3], "").await;
    for n in [1, 2, 4, 5, 6] {
        env.github.add_pull(FakePull::open(n));
    }
    env.github.add_issue(3);
    env.prm()
        .args(["sync", "--mode", "sequential", "--end", "2"])
        .assert()
        .success();

    let output = env.prm().args(["sync", "--mode", "gap-priority"]).output().unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["mode"], "gap-priority");
    assert_eq!(json["collected"], 3);
    assert_eq!(json["not_found"], 0);
    assert!(!env.entry(3).exists());

    let details: Vec<String> = env
        .github
        .requested_paths()
        .await
        .into_iter()
        .filter(|r| r.starts_with("/repos/o/r/pulls/"))
        .filter(|r| r.trim_start_matches("/repos/o/r/pulls/").parse::<u64>().is_ok())
        .collect();
    // Two from the sequential run, then only 4, 5 and 6.
    assert_eq!(
        details,
        ["/repos/o/r/pulls/1", "/repos/o/r/pulls/2", "/repos/o/r/pulls/4", "/repos/o/r/pulls/5", "/repos/o/r/pulls/6"]
    );
}

// === State check ===

#[tokio::test]
async fn test_state_check_refreshes_changed_entries() {
    let env = env_with_pulls(&[1, 2, 3]).await;
    env.prm().arg("sync").assert().success();
    let untouched = std::fs::read(env.entry(1)).unwrap();

    env.github.add_pull(
        FakePull::merged(2)
            .updated("2025-06-10T00:00:00Z")
            .label("accepted"),
    );

    let output = env
        .prm()
        .args(["sync", "--mode", "state-check", "--since", "2025-01-01"])
        .output()
        .unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["mode"], "state-check");
    assert_eq!(json["updated"], 1);
    assert_eq!(json["unchanged"], 2);
    assert_eq!(json["collected"], 0);

    let refreshed = env.read_entry(2);
    assert_eq!(refreshed["basic_info"]["state"], "closed");
    assert_eq!(refreshed["labels"][0]["name"], "accepted");
    assert_eq!(std::fs::read(env.entry(1)).unwrap(), untouched);
}

#[tokio::test]
async fn test_state_check_window_excludes_old_items() {
    let env = env_with_pulls(&[1, 2]).await;
    let output = env
        .prm()
        .args(["sync", "--mode", "state-check", "--recent-days", "7"])
        .output()
        .unwrap();
    let json = stdout_json(&output);
    // Fixture items were last updated in January 2025.
    assert_eq!(json["collected"], 0);
    assert_eq!(json["stopped"], "cutoff");
}

#[tokio::test]
async fn test_listing_failure_fails_sync() {
    let env = env_with_pulls(&[1]).await;
    env.github.take_listing_down().await;
    env.prm()
        .arg("sync")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("503"));
    assert!(!env.data_path().join("last_run_info.json").exists());
}
