//! End-to-end tests of the `domreel` binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use super::common::fixtures::{sample_bundle, sample_page, write_bundle};

fn domreel(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("domreel").expect("binary builds");
    cmd.arg("--data-dir").arg(data_dir.path());
    cmd
}

fn import_sample(data_dir: &TempDir) -> String {
    let file = data_dir.path().join("recording-sample.json");
    write_bundle(&file, &sample_bundle());
    let output = domreel(data_dir).arg("import").arg(&file).output().unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

#[test]
fn import_then_render() {
    let data_dir = TempDir::new().unwrap();
    let id = import_sample(&data_dir);
    assert!(id.starts_with("imported_"));

    domreel(&data_dir)
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()).and(predicate::str::contains("2 snapshots")));

    domreel(&data_dir)
        .args(["render", id.as_str(), "--index", "99"])
        .assert()
        .success()
        .stdout(
            predicate::str::starts_with("<!DOCTYPE html>")
                .and(predicate::str::contains("<p>1</p>"))
                .and(predicate::str::contains("data:image/png;base64,AA==")),
        );

    domreel(&data_dir)
        .args(["show", id.as_str()])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Snapshot: 1/2 - ")
                .and(predicate::str::contains("Snapshot: 2/2 - ")),
        );

    assert!(data_dir.path().join("timelines.db").exists());
    assert!(data_dir.path().join("logs").join("domreel.log").exists());
}

#[test]
fn malformed_import_fails_and_commits_nothing() {
    let data_dir = TempDir::new().unwrap();
    let file = data_dir.path().join("broken.json");
    std::fs::write(&file, "{ \"snapshots\": 12 ").unwrap();

    domreel(&data_dir)
        .arg("import")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to import"));

    domreel(&data_dir)
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions"));
}

#[test]
fn delete_and_export() {
    let data_dir = TempDir::new().unwrap();
    let id = import_sample(&data_dir);

    domreel(&data_dir)
        .args(["delete", id.as_str(), "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));

    domreel(&data_dir).args(["delete", id.as_str(), "1"]).assert().success();

    let exports = data_dir.path().join("out");
    domreel(&data_dir)
        .args(["export", id.as_str(), "--dir"])
        .arg(&exports)
        .assert()
        .success();
    let exported = exports.join(format!("recording-{id}.json"));
    let bundle = domreel::TimelineBundle::read_from_path(&exported).unwrap();
    assert_eq!(bundle.snapshots.len(), 1);

    domreel(&data_dir)
        .args(["export", id.as_str(), "--snapshot", "1", "--dir"])
        .arg(&exports)
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("snapshot-{id}-1-")));

    domreel(&data_dir).args(["clear", id.as_str()]).assert().success();
    domreel(&data_dir)
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions"));
}

#[test]
fn config_set_mode_edits_the_config_file() {
    let data_dir = TempDir::new().unwrap();
    domreel(&data_dir)
        .args(["config", "set-mode", "paint"])
        .assert()
        .success();

    let config = std::fs::read_to_string(data_dir.path().join("config.toml")).unwrap();
    assert!(config.contains(r#"default_mode = "paint""#));
    assert!(config.contains("# domreel configuration"));
}

#[test]
fn record_a_local_file() {
    let data_dir = TempDir::new().unwrap();
    let page = data_dir.path().join("page.html");
    std::fs::write(&page, sample_page(3)).unwrap();

    domreel(&data_dir)
        .args(["record", "--session", "local", "--duration", "1"])
        .arg(&page)
        .assert()
        .success()
        .stdout(predicate::str::contains("local: 1 snapshots"));

    domreel(&data_dir)
        .args(["render", "local"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"<p id="n">3</p>"#).and(predicate::str::contains("<script").not()));
}
