//! CLI integration tests using assert_cmd.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn adaptest(home: &Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("adaptest").unwrap();
    cmd.env("HOME", home)
        .env_remove("ADAPTEST_SEED")
        .env_remove("ADAPTEST_ESTIMATOR");
    cmd
}

fn sample_bank() -> PathBuf {
    PathBuf::from("../../item-banks/sample.toml")
        .canonicalize()
        .unwrap()
}

fn find_output(dir: &Path, prefix: &str) -> PathBuf {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .unwrap_or_else(|| panic!("no {prefix}* in {}", dir.display()))
}

#[test]
fn validate_sample_bank() {
    let home = TempDir::new().unwrap();
    adaptest(home.path())
        .arg("validate")
        .arg("--bank")
        .arg(sample_bank())
        .assert()
        .success()
        .stdout(predicate::str::contains("48 items"))
        .stdout(predicate::str::contains("All item banks valid"));
}

#[test]
fn validate_directory() {
    let home = TempDir::new().unwrap();
    adaptest(home.path())
        .arg("validate")
        .arg("--bank")
        .arg("../../item-banks")
        .assert()
        .success()
        .stdout(predicate::str::contains("sample size 2400"));
}

#[test]
fn validate_reports_warnings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("weak.toml");
    std::fs::write(
        &path,
        r#"
[calibration]
sample_size = 300

[[items]]
id = "flat"
a = 0.1
b = 0.0
key = "A"
"#,
    )
    .unwrap();

    adaptest(dir.path())
        .arg("validate")
        .arg("--bank")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("[flat] WARNING: low discrimination"))
        .stdout(predicate::str::contains("1 warning(s) found"));
}

#[test]
fn validate_nonexistent_file() {
    let home = TempDir::new().unwrap();
    adaptest(home.path())
        .arg("validate")
        .arg("--bank")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    adaptest(dir.path())
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created adaptest.toml"))
        .stdout(predicate::str::contains("Created item-banks/example.toml"));

    assert!(dir.path().join("adaptest.toml").exists());
    assert!(dir.path().join("item-banks/example.toml").exists());

    adaptest(dir.path())
        .current_dir(dir.path())
        .arg("validate")
        .arg("--bank")
        .arg("item-banks/example.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("16 items"))
        .stdout(predicate::str::contains("All item banks valid"));
}

#[test]
fn init_skips_existing() {
    let dir = TempDir::new().unwrap();

    adaptest(dir.path())
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    adaptest(dir.path())
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn simulate_then_replay() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("results");

    adaptest(dir.path())
        .current_dir(dir.path())
        .arg("simulate")
        .arg("--bank")
        .arg(sample_bank())
        .args(["--sessions", "25", "--seed", "7", "--max-items", "12"])
        .arg("--session-reports")
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("RMSE"))
        .stdout(predicate::str::contains("Results saved to"));

    let report_path = find_output(&output, "simulation-");
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["sessions"].as_array().unwrap().len(), 25);
    assert_eq!(report["seed"], 7);

    adaptest(dir.path())
        .arg("replay")
        .arg("--report")
        .arg(&report_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Replay OK: 25 session(s) reproduced"));

    let sessions_dir = find_output(&output, "sessions-");
    let one = std::fs::read_dir(&sessions_dir)
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    adaptest(dir.path())
        .arg("replay")
        .arg("--report")
        .arg(&one)
        .assert()
        .success()
        .stdout(predicate::str::contains("Replay OK: 1 session(s) reproduced"));
}

#[test]
fn simulate_rejects_unknown_estimator() {
    let dir = TempDir::new().unwrap();
    adaptest(dir.path())
        .current_dir(dir.path())
        .arg("simulate")
        .arg("--bank")
        .arg(sample_bank())
        .args(["--estimator", "wle"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown estimation method"));
}

#[test]
fn replay_without_session_reports_fails() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("results");

    adaptest(dir.path())
        .current_dir(dir.path())
        .arg("simulate")
        .arg("--bank")
        .arg(sample_bank())
        .args(["--sessions", "5", "--seed", "3"])
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    adaptest(dir.path())
        .arg("replay")
        .arg("--report")
        .arg(find_output(&output, "simulation-"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--session-reports"));
}

#[test]
fn replay_nonexistent_report() {
    let home = TempDir::new().unwrap();
    adaptest(home.path())
        .arg("replay")
        .arg("--report")
        .arg("no_such_file.json")
        .assert()
        .failure();
}

#[test]
fn help_output() {
    let home = TempDir::new().unwrap();
    adaptest(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Computerized adaptive testing engine"));
}

#[test]
fn version_output() {
    let home = TempDir::new().unwrap();
    adaptest(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("adaptest"));
}
