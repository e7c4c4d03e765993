use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::path::Path;

fn status(data_dir: &Path) -> Value {
    let output = cargo_bin_cmd!("roadbook")
        .arg("--data-dir")
        .arg(data_dir)
        .arg("status")
        .env_remove("ROADBOOK_DATA_DIR")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    serde_json::from_slice(&output).expect("stdout should contain valid json")
}

#[test]
fn status_of_fresh_data_dir_is_empty() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    assert_eq!(
        status(temp.path()),
        json!({ "document": null, "scroll": { "page_index": 0, "page_offset": 0 } })
    );
}

#[test]
fn scroll_is_persisted_across_runs() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("roadbook")
        .arg("--data-dir")
        .arg(temp.path())
        .args(["scroll", "3", "40"])
        .assert()
        .success();

    assert_eq!(status(temp.path())["scroll"], json!({ "page_index": 3, "page_offset": 40 }));
    assert!(temp.path().join("session.json").is_file());
}

#[test]
fn load_fails_for_missing_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("roadbook")
        .arg("--data-dir")
        .arg(temp.path())
        .arg("load")
        .arg(temp.path().join("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load"));

    assert_eq!(status(temp.path())["document"], Value::Null);
}

#[test]
fn window_requires_a_document() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("roadbook")
        .arg("--data-dir")
        .arg(temp.path())
        .args(["window", "--anchor", "4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no document loaded"));
}

#[test]
fn clear_resets_persisted_state() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("roadbook")
        .arg("--data-dir")
        .arg(temp.path())
        .args(["scroll", "8", "1"])
        .assert()
        .success();

    cargo_bin_cmd!("roadbook")
        .arg("--data-dir")
        .arg(temp.path())
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("cleared"));

    assert_eq!(
        status(temp.path()),
        json!({ "document": null, "scroll": { "page_index": 0, "page_offset": 0 } })
    );
}

#[test]
fn invalid_config_file_is_reported() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let config = temp.path().join("roadbook.toml");
    std::fs::write(&config, "page_size = 0\n").unwrap();

    cargo_bin_cmd!("roadbook")
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(temp.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("page_size"));
}
