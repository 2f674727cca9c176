//! Integration tests for the `bsync` CLI.
//!
//! Each test creates a temp board directory with a config and a local store,
//! runs `bsync` as a subprocess, and verifies stdout and/or the store file.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;

/// Get the path to the built `bsync` binary.
fn bsync_bin() -> PathBuf {
    // cargo test builds to target/debug/
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("bsync");
    path
}

/// Create a small board: three stages (one excluded from totals), two
/// tranches, three projects (two at the same location), alerts for two users.
fn create_test_board(root: &Path) {
    let board_dir = root.join("board");
    fs::create_dir_all(&board_dir).unwrap();

    fs::write(
        board_dir.join("board.toml"),
        r#"[board]
name = "Residential"
user_id = "u1"
excluded_stage_ids = ["lost"]
"#,
    )
    .unwrap();

    fs::write(
        board_dir.join("store.json"),
        r#"{
  "stages": [
    {"id": "s1", "title": "Survey", "view": "sales", "order": 1},
    {"id": "s2", "title": "Install", "view": "install", "order": 2},
    {"id": "lost", "title": "Lost", "view": "sales", "order": 3}
  ],
  "tranches": [
    {"id": "t1", "number": 1},
    {"id": "t2", "number": 2}
  ],
  "projects": [
    {"id": "P-1", "owner_name": "Avery Stone", "stage_id": "s1", "tranche_id": "t1",
     "capacity_kw": 5.0, "latitude": "40.123456", "longitude": "-74.000001",
     "sales_rep": "Jo", "tags": ["roof"], "modified_at": "2025-05-03"},
    {"id": "P-2", "owner_name": "Blake Moss", "stage_id": "s2", "tranche_id": null,
     "capacity_kw": "7.5", "latitude": 40.1234561, "longitude": -74.0000009,
     "cash_deal": true, "modified_at": "2025-05-01"},
    {"id": "P-3", "owner_name": "Casey Lin", "stage_id": "lost", "tranche_id": "t2",
     "capacity_kw": 3.0, "latitude": "0", "longitude": "0",
     "need_help": true, "modified_at": "2025-05-02"}
  ],
  "users": [
    {"id": "u1", "name": "Robin", "email": "robin@example.com"}
  ],
  "alerts": [
    {"id": "a1", "recipient_id": "u1", "is_read": false, "type": "note", "message": "First note", "project_id": "P-1"},
    {"id": "a2", "recipient_id": "u1", "is_read": false, "type": "stage_change", "message": "P-2 moved"},
    {"id": "a3", "recipient_id": "u2", "is_read": false, "type": "note", "message": "Not mine"},
    {"id": "a4", "recipient_id": "u1", "is_read": true, "type": "note", "message": "Old"}
  ]
}
"#,
    )
    .unwrap();
}

fn setup() -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    create_test_board(dir.path());
    dir
}

/// Run bsync and return (stdout, stderr, success).
fn run_bsync(dir: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(bsync_bin())
        .args(args)
        .current_dir(dir)
        .env_remove("BSYNC_LOG")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run bsync");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Run bsync and assert success, returning stdout.
fn run_bsync_ok(dir: &Path, args: &[&str]) -> String {
    let (stdout, stderr, success) = run_bsync(dir, args);
    if !success {
        panic!(
            "bsync {:?} failed:\nstdout: {}\nstderr: {}",
            args, stdout, stderr
        );
    }
    stdout
}

fn run_bsync_json(dir: &Path, args: &[&str]) -> Value {
    let mut full = vec!["--json"];
    full.extend_from_slice(args);
    let stdout = run_bsync_ok(dir, &full);
    serde_json::from_str(&stdout).unwrap()
}

/// First column (item id) of each listed line
fn listed_ids(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|l| l.trim_start_matches('*').split_whitespace().next())
        .map(str::to_string)
        .collect()
}

fn read_store(dir: &Path) -> Value {
    let text = fs::read_to_string(dir.join("board/store.json")).unwrap();
    serde_json::from_str(&text).unwrap()
}

fn store_record(dir: &Path, source: &str, id: &str) -> Value {
    read_store(dir)[source]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["id"] == id)
        .cloned()
        .unwrap()
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

#[test]
fn test_list_default_sort_is_newest_modified_first() {
    let dir = setup();
    let stdout = run_bsync_ok(dir.path(), &["list"]);
    assert_eq!(listed_ids(&stdout), vec!["P-1", "P-3", "P-2"]);
}

#[test]
fn test_list_marks_duplicates() {
    let dir = setup();
    let stdout = run_bsync_ok(dir.path(), &["list"]);
    let p1 = stdout.lines().find(|l| l.contains("P-1")).unwrap();
    let p3 = stdout.lines().find(|l| l.contains("P-3")).unwrap();
    assert!(p1.starts_with('*'));
    assert!(!p3.starts_with('*'));
}

#[test]
fn test_list_search() {
    let dir = setup();
    let stdout = run_bsync_ok(dir.path(), &["list", "--search", "  BLAKE "]);
    assert_eq!(listed_ids(&stdout), vec!["P-2"]);
}

#[test]
fn test_list_filters() {
    let dir = setup();
    let stdout = run_bsync_ok(dir.path(), &["list", "--tag", "roof"]);
    assert_eq!(listed_ids(&stdout), vec!["P-1"]);

    let stdout = run_bsync_ok(dir.path(), &["list", "--cash-deal", "no"]);
    assert_eq!(listed_ids(&stdout), vec!["P-1", "P-3"]);

    let stdout = run_bsync_ok(dir.path(), &["list", "--need-help", "yes"]);
    assert_eq!(listed_ids(&stdout), vec!["P-3"]);

    let stdout = run_bsync_ok(dir.path(), &["list", "--only-duplicates"]);
    assert_eq!(listed_ids(&stdout), vec!["P-1", "P-2"]);
}

#[test]
fn test_list_bad_tristate() {
    let dir = setup();
    let (_, stderr, success) = run_bsync(dir.path(), &["list", "--cash-deal", "maybe"]);
    assert!(!success);
    assert!(stderr.contains("expected: yes, no, any"));
}

#[test]
fn test_list_sort_is_remembered_until_reset() {
    let dir = setup();
    let stdout = run_bsync_ok(dir.path(), &["list", "--sort", "capacity_kw"]);
    assert_eq!(listed_ids(&stdout), vec!["P-3", "P-1", "P-2"]);

    let stdout = run_bsync_ok(dir.path(), &["list"]);
    assert_eq!(listed_ids(&stdout), vec!["P-3", "P-1", "P-2"]);

    let stdout = run_bsync_ok(dir.path(), &["list", "--desc"]);
    assert_eq!(listed_ids(&stdout), vec!["P-2", "P-1", "P-3"]);

    let stdout = run_bsync_ok(dir.path(), &["list", "--reset"]);
    assert_eq!(listed_ids(&stdout), vec!["P-1", "P-3", "P-2"]);
}

#[test]
fn test_list_unknown_sort_field() {
    let dir = setup();
    let (_, stderr, success) = run_bsync(dir.path(), &["list", "--sort", "colour"]);
    assert!(!success);
    assert!(stderr.contains("unknown sort field: colour"));
}

#[test]
fn test_list_json() {
    let dir = setup();
    let items = run_bsync_json(dir.path(), &["list"]);
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["id"], "P-1");
    assert_eq!(items[0]["stage"], "Survey");
    assert_eq!(items[0]["tranche"], "Tranche 1");
    assert_eq!(items[0]["duplicate"], true);
    assert_eq!(items[1]["duplicate"], false);
    assert_eq!(items[2]["capacity_kw"], 7.5);
}

// ---------------------------------------------------------------------------
// board
// ---------------------------------------------------------------------------

#[test]
fn test_board_stage_mode_excludes_lost_from_total() {
    let dir = setup();
    let stdout = run_bsync_ok(dir.path(), &["board"]);
    assert!(stdout.contains("▾ Survey (s1)  1 items, 5.0 kW"));
    assert!(stdout.contains("▾ Lost (lost)  1 items, 3.0 kW"));
    assert!(stdout.contains("3 visible, 2 counted, 12.5 kW total"));
}

#[test]
fn test_board_tranche_mode_json() {
    let dir = setup();
    let board = run_bsync_json(dir.path(), &["board", "--mode", "tranche"]);
    assert_eq!(board["mode"], "bytranche");
    let keys: Vec<&str> = board["columns"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["unassigned", "t1", "t2"]);
    assert_eq!(board["columns"][0]["items"][0]["id"], "P-2");
    assert_eq!(board["counted_items"], 2);
    assert_eq!(board["total_capacity_kw"], 8.0);
}

#[test]
fn test_board_stage_view() {
    let dir = setup();
    let board = run_bsync_json(dir.path(), &["board", "--view", "sales"]);
    let keys: Vec<&str> = board["columns"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["s1", "lost"]);
}

#[test]
fn test_board_unknown_mode() {
    let dir = setup();
    let (_, stderr, success) = run_bsync(dir.path(), &["board", "--mode", "owner"]);
    assert!(!success);
    assert!(stderr.contains("unknown board mode: owner"));
}

#[test]
fn test_collapse_and_expand() {
    let dir = setup();
    run_bsync_ok(dir.path(), &["collapse", "s1"]);
    let stdout = run_bsync_ok(dir.path(), &["board"]);
    assert!(stdout.contains("▸ Survey (s1)  1 items, 5.0 kW"));
    assert!(!stdout.contains("P-1"));

    run_bsync_ok(dir.path(), &["expand", "s1"]);
    let stdout = run_bsync_ok(dir.path(), &["board"]);
    assert!(stdout.contains("▾ Survey (s1)"));
    assert!(stdout.contains("P-1"));
}

// ---------------------------------------------------------------------------
// dups
// ---------------------------------------------------------------------------

#[test]
fn test_dups() {
    let dir = setup();
    let stdout = run_bsync_ok(dir.path(), &["dups"]);
    assert_eq!(stdout.trim(), "40.123456,-74.000001  P-1, P-2");

    let clusters = run_bsync_json(dir.path(), &["dups"]);
    assert_eq!(clusters[0]["items"], serde_json::json!(["P-1", "P-2"]));
}

// ---------------------------------------------------------------------------
// moves
// ---------------------------------------------------------------------------

#[test]
fn test_move_stage_persists_and_logs_activity() {
    let dir = setup();
    let stdout = run_bsync_ok(dir.path(), &["move-stage", "P-1", "s2"]);
    assert!(stdout.contains("Avery Stone moved to stage Install"));

    assert_eq!(store_record(dir.path(), "projects", "P-1")["stage_id"], "s2");
    let activity = read_store(dir.path())["activity"].clone();
    let activity = activity.as_array().unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0]["project_id"], "P-1");
    assert_eq!(activity[0]["from_label"], "Survey");
    assert_eq!(activity[0]["to_label"], "Install");
    assert_eq!(activity[0]["user_id"], "u1");

    let items = run_bsync_json(dir.path(), &["list"]);
    assert_eq!(items[0]["stage"], "Install");
}

#[test]
fn test_move_stage_json() {
    let dir = setup();
    let out = run_bsync_json(dir.path(), &["move-stage", "P-1", "s2"]);
    assert_eq!(out["changed"], true);
    assert_eq!(out["field"], "stage");
    assert_eq!(out["from"], "Survey");
    assert_eq!(out["to"], "Install");
}

#[test]
fn test_move_to_current_stage_is_noop() {
    let dir = setup();
    let stdout = run_bsync_ok(dir.path(), &["move-stage", "P-1", "s1"]);
    assert!(stdout.contains("already in that stage"));
    assert!(read_store(dir.path()).get("activity").is_none());
}

#[test]
fn test_move_unknown_target_and_item() {
    let dir = setup();
    let (_, stderr, success) = run_bsync(dir.path(), &["move-stage", "P-1", "nope"]);
    assert!(!success);
    assert!(stderr.contains("unknown stage: nope"));

    let (_, stderr, success) = run_bsync(dir.path(), &["move-stage", "P-9", "s2"]);
    assert!(!success);
    assert!(stderr.contains("item not found: P-9"));
    assert_eq!(store_record(dir.path(), "projects", "P-1")["stage_id"], "s1");
}

#[test]
fn test_move_tranche_and_unassign() {
    let dir = setup();
    run_bsync_ok(dir.path(), &["move-tranche", "P-2", "t1"]);
    assert_eq!(store_record(dir.path(), "projects", "P-2")["tranche_id"], "t1");

    let out = run_bsync_json(dir.path(), &["move-tranche", "P-2", "unassigned"]);
    assert_eq!(out["from"], "Tranche 1");
    assert_eq!(out["to"], "Unassigned");
    assert_eq!(
        store_record(dir.path(), "projects", "P-2")["tranche_id"],
        Value::Null
    );
}

// ---------------------------------------------------------------------------
// alerts
// ---------------------------------------------------------------------------

#[test]
fn test_alerts_lists_unread_for_current_user() {
    let dir = setup();
    let stdout = run_bsync_ok(dir.path(), &["alerts"]);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec!["a1  [note] First note (P-1)", "a2  [stage_change] P-2 moved"]
    );
}

#[test]
fn test_ack_one() {
    let dir = setup();
    run_bsync_ok(dir.path(), &["ack", "a1"]);
    assert_eq!(store_record(dir.path(), "alerts", "a1")["is_read"], true);
    let stdout = run_bsync_ok(dir.path(), &["alerts"]);
    assert!(!stdout.contains("a1"));
    assert!(stdout.contains("a2"));
}

#[test]
fn test_ack_unknown_alert_fails() {
    let dir = setup();
    let (_, stderr, success) = run_bsync(dir.path(), &["ack", "zz"]);
    assert!(!success);
    assert!(stderr.contains("NOT_FOUND"));
}

#[test]
fn test_ack_all_leaves_other_users_alone() {
    let dir = setup();
    let out = run_bsync_json(dir.path(), &["ack-all"]);
    assert_eq!(out["acknowledged"], serde_json::json!(["a1", "a2"]));
    let stdout = run_bsync_ok(dir.path(), &["alerts"]);
    assert_eq!(stdout.trim(), "no unread alerts");
    assert_eq!(store_record(dir.path(), "alerts", "a3")["is_read"], false);
}

#[test]
fn test_watch_single_cycle() {
    let dir = setup();
    let stdout = run_bsync_ok(dir.path(), &["watch", "--cycles", "1", "--interval", "1"]);
    assert!(stdout.contains("watching: 2 unread alerts"));
}

// ---------------------------------------------------------------------------
// whoami
// ---------------------------------------------------------------------------

#[test]
fn test_whoami_uses_cache() {
    let dir = setup();
    let stdout = run_bsync_ok(dir.path(), &["whoami"]);
    assert_eq!(stdout.trim(), "Robin (u1) <robin@example.com>");

    // Drop the user from the store; the cached profile still answers.
    let mut store = read_store(dir.path());
    store["users"] = serde_json::json!([]);
    fs::write(
        dir.path().join("board/store.json"),
        serde_json::to_string(&store).unwrap(),
    )
    .unwrap();
    let stdout = run_bsync_ok(dir.path(), &["whoami"]);
    assert!(stdout.contains("Robin"));

    let (_, stderr, success) = run_bsync(dir.path(), &["whoami", "--refresh"]);
    assert!(!success);
    assert!(stderr.contains("user u1 not found"));
}

// ---------------------------------------------------------------------------
// discovery
// ---------------------------------------------------------------------------

#[test]
fn test_not_a_board() {
    let dir = tempfile::TempDir::new().unwrap();
    let (_, stderr, success) = run_bsync(dir.path(), &["list"]);
    assert!(!success);
    assert!(stderr.contains("not a board directory"));
}

#[test]
fn test_board_dir_flag_and_subdirectory() {
    let dir = setup();
    let nested = dir.path().join("deep/er");
    fs::create_dir_all(&nested).unwrap();
    let stdout = run_bsync_ok(&nested, &["list"]);
    assert_eq!(listed_ids(&stdout).len(), 3);

    let elsewhere = tempfile::TempDir::new().unwrap();
    let board = dir.path().to_string_lossy().to_string();
    let stdout = run_bsync_ok(elsewhere.path(), &["-C", &board, "list"]);
    assert_eq!(listed_ids(&stdout).len(), 3);
}
