//! CLI command integration tests.
//! Each test uses a temp directory via ROLLCALL_DATA_DIR for full isolation.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn rollcall(data_dir: &TempDir) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("rollcall").unwrap();
    cmd.env("ROLLCALL_DATA_DIR", data_dir.path())
        .env("ROLLCALL_EMBEDDING_DIM", "3")
        .env_remove("ROLLCALL_CONFIG")
        .env_remove("ROLLCALL_LEDGER_PATH")
        .env_remove("ROLLCALL_MATCH_THRESHOLD");
    cmd
}

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn enroll(dir: &TempDir, name: &str, embedding: &str) {
    let frame = write(
        dir,
        &format!("{name}.json"),
        &format!(
            r#"[{{"bbox":{{"x1":0,"y1":0,"x2":9,"y2":9,"confidence":0.3}},"embedding":[0,0,1]}},
                {{"bbox":{{"x1":0,"y1":0,"x2":9,"y2":9,"confidence":0.9}},"embedding":{embedding}}}]"#
        ),
    );
    rollcall(dir)
        .args(["enroll", "--name", name])
        .arg(&frame)
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Enrolled {name}")));
}

#[test]
fn list_fresh_gallery() {
    let dir = TempDir::new().unwrap();
    rollcall(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No identities enrolled"));
}

#[test]
fn enroll_picks_best_face_and_lists() {
    let dir = TempDir::new().unwrap();
    enroll(&dir, "alice", "[1,0,0]");
    enroll(&dir, "bob", "[0,1,0]");

    rollcall(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("0  alice"))
        .stdout(predicate::str::contains("1  bob"));

    // The low-confidence [0,0,1] face was not enrolled
    let probe = write(&dir, "probe.json", "[0,0,1]");
    rollcall(&dir)
        .arg("identify")
        .arg(&probe)
        .assert()
        .success()
        .stdout(predicate::str::contains("UNKNOWN"));
}

#[test]
fn enroll_without_faces_fails() {
    let dir = TempDir::new().unwrap();
    let frame = write(&dir, "empty.json", "[]");
    rollcall(&dir)
        .args(["enroll", "--name", "ghost"])
        .arg(&frame)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no face"));
}

#[test]
fn enroll_wrong_dimension_fails() {
    let dir = TempDir::new().unwrap();
    let frame = write(
        &dir,
        "wide.json",
        r#"[{"bbox":{"x1":0,"y1":0,"x2":9,"y2":9},"embedding":[1,0,0,0]}]"#,
    );
    rollcall(&dir)
        .args(["enroll", "--name", "wide"])
        .arg(&frame)
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected 3"));
}

#[test]
fn identify_matches_enrolled_identity() {
    let dir = TempDir::new().unwrap();
    enroll(&dir, "alice", "[1,0,0]");
    let probe = write(&dir, "probe.json", "[0.9,0.1,0.05]");
    rollcall(&dir)
        .arg("identify")
        .arg(&probe)
        .assert()
        .success()
        .stdout(predicate::str::contains("MATCH alice"));
}

#[test]
fn identify_empty_gallery_is_unknown() {
    let dir = TempDir::new().unwrap();
    let probe = write(&dir, "probe.json", "[1,0,0]");
    rollcall(&dir)
        .arg("identify")
        .arg(&probe)
        .assert()
        .success()
        .stdout(predicate::str::contains("UNKNOWN (score 0.000)"));
}

#[test]
fn reset_requires_confirmation() {
    let dir = TempDir::new().unwrap();
    enroll(&dir, "alice", "[1,0,0]");
    rollcall(&dir).arg("reset").assert().failure();
    rollcall(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("alice"));
}

#[test]
fn reset_restarts_ids() {
    let dir = TempDir::new().unwrap();
    enroll(&dir, "alice", "[1,0,0]");
    enroll(&dir, "bob", "[0,1,0]");

    rollcall(&dir)
        .args(["reset", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 identities removed"));

    enroll(&dir, "carol", "[0,1,0]");
    rollcall(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("0  carol"))
        .stdout(predicate::str::contains("bob").not());
}

#[test]
fn corrupted_index_keeps_names_as_orphans() {
    let dir = TempDir::new().unwrap();
    enroll(&dir, "alice", "[1,0,0]");
    std::fs::write(dir.path().join("vector_db/faces.index"), b"junk").unwrap();

    rollcall(&dir)
        .arg("list")
        .env("RUST_LOG", "warn")
        .assert()
        .success()
        .stdout(predicate::str::contains("alice  (vector lost, re-enroll)"))
        .stderr(predicate::str::contains("vector index unusable"))
        .stderr(predicate::str::contains("lost their vectors"));
}

#[test]
fn enroll_and_reset_are_logged() {
    let dir = TempDir::new().unwrap();
    let frame = write(
        &dir,
        "alice.json",
        r#"[{"bbox":{"x1":0,"y1":0,"x2":9,"y2":9},"embedding":[1,0,0]}]"#,
    );
    rollcall(&dir)
        .args(["enroll", "--name", "alice"])
        .arg(&frame)
        .env("RUST_LOG", "info")
        .assert()
        .success()
        .stderr(predicate::str::contains("identity enrolled"));

    rollcall(&dir)
        .args(["reset", "--yes"])
        .env("RUST_LOG", "info")
        .assert()
        .success()
        .stderr(predicate::str::contains("gallery reset"));
}

#[test]
fn attendance_report_for_date() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "attendance.csv",
        "name,date,time\nalice,2024-03-01,09:00:05\nbob,2024-03-02,09:10:00\n",
    );

    rollcall(&dir)
        .args(["attendance", "--date", "2024-03-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2024-03-01  09:00:05  alice"))
        .stdout(predicate::str::contains("1 present"))
        .stdout(predicate::str::contains("bob").not());

    rollcall(&dir)
        .args(["attendance", "--date", "2023-12-25"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No attendance recorded for 2023-12-25"));
}
