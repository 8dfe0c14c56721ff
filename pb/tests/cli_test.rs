//! CLI tests for the commands that need no model

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn sample_catalog() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("catalogs").join("blog.yml")
}

/// `pb` isolated from user config and credentials
fn pb(temp: &TempDir) -> Command {
    let config = temp.path().join("pagebuilder.yml");
    std::fs::write(&config, "llm:\n  api-key-env: PB_TEST_MISSING_API_KEY\n").unwrap();

    let mut cmd = Command::cargo_bin("pb").unwrap();
    cmd.current_dir(temp.path())
        .env_remove("PB_TEST_MISSING_API_KEY")
        .env("NO_COLOR", "1")
        .arg("--config")
        .arg(config);
    cmd
}

#[test]
fn test_schema_command_prints_definitions() {
    let temp = TempDir::new().unwrap();
    let output = pb(&temp)
        .arg("schema")
        .arg("--catalog")
        .arg(sample_catalog())
        .output()
        .unwrap();
    assert!(output.status.success());

    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(schema["required"], serde_json::json!(["path", "title", "description", "main"]));
    assert!(schema["$defs"]["Rich_Text"].is_object());
    assert_eq!(
        schema["$defs"]["Footer"]["properties"]["children"]["properties"]["footer-links"]["items"],
        serde_json::json!({"$ref": "#/$defs/Promo"})
    );
}

#[test]
fn test_catalog_command_lists_components() {
    let temp = TempDir::new().unwrap();
    pb(&temp)
        .arg("catalog")
        .arg("--catalog")
        .arg(sample_catalog())
        .assert()
        .success()
        .stdout(predicate::str::contains("9 components"))
        .stdout(predicate::str::contains("Column Splitter"))
        .stdout(predicate::str::contains("footer-links [Promo]"));
}

#[test]
fn test_schema_command_rejects_dangling_reference() {
    let temp = TempDir::new().unwrap();
    let catalog = temp.path().join("broken.yml");
    std::fs::write(
        &catalog,
        "- name: Container\n  placeholders:\n    - name: content\n      allowed: [Carousel]\n",
    )
    .unwrap();

    pb(&temp)
        .arg("schema")
        .arg("--catalog")
        .arg(&catalog)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Carousel"));
}

#[test]
fn test_missing_catalog_file() {
    let temp = TempDir::new().unwrap();
    pb(&temp)
        .arg("catalog")
        .arg("--catalog")
        .arg(temp.path().join("nope.yml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.yml"));
}

#[test]
fn test_generate_requires_api_key() {
    let temp = TempDir::new().unwrap();
    pb(&temp)
        .arg("generate")
        .arg("A blog")
        .assert()
        .failure()
        .stderr(predicate::str::contains("PB_TEST_MISSING_API_KEY"));
}

#[test]
fn test_version_flag() {
    Command::cargo_bin("pb")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("pb "));
}
