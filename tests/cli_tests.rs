use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to create a geocoder command
fn geocoder_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("geocoder"));
    cmd.env_remove("GEOIP_DATABASE_PATH").env_remove("RUST_LOG");
    cmd
}

/// Build a small database from CSV and return its path
fn build_db(dir: &Path) -> PathBuf {
    let csv = dir.join("networks.csv");
    fs::write(
        &csv,
        "network,iso_code,registered_iso_code\n\
         # sample rows\n\
         10.0.0.0/8,RU,\n\
         11.0.0.0/8,ru,\n\
         12.0.0.0/8,RU,\n\
         2001:db8::/32,,US\n",
    )
    .unwrap();

    let db = dir.join("country.mmdb");
    geocoder_cmd()
        .arg("build")
        .arg(&csv)
        .arg("-o")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"networks\": 4"));
    db
}

#[test]
fn test_help() {
    geocoder_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("IP-to-country index"));
}

#[test]
fn test_version() {
    geocoder_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("geocoder"));
}

#[test]
fn test_build_help() {
    geocoder_cmd()
        .arg("build")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Build a country database"));
}

#[test]
fn test_missing_database_fails() {
    geocoder_cmd()
        .arg("-d")
        .arg("/nonexistent/country.mmdb")
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load database"));
}

#[test]
fn test_stats() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path());

    geocoder_cmd()
        .arg("-d")
        .arg(&db)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_networks\": 4"))
        .stdout(predicate::str::contains("\"unique_countries\": 2"));
}

#[test]
fn test_database_from_env() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path());

    geocoder_cmd()
        .env("GEOIP_DATABASE_PATH", &db)
        .arg("countries")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"iso_code\": \"RU\""))
        .stdout(predicate::str::contains("\"ranges_count\": 3"));
}

#[test]
fn test_lookup() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path());

    geocoder_cmd()
        .arg("-d")
        .arg(&db)
        .arg("lookup")
        .arg("2001:db8::/32")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"iso_code\": \"US\""));
}

#[test]
fn test_lookup_not_found_exits_1() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path());

    geocoder_cmd()
        .arg("-d")
        .arg(&db)
        .arg("lookup")
        .arg("10.0.0.0/9")
        .assert()
        .code(1);
}

#[test]
fn test_ranges_paged() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path());

    geocoder_cmd()
        .arg("-d")
        .arg(&db)
        .args(["ranges", "ru", "--page", "1", "--size", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("12.0.0.0/8"))
        .stdout(predicate::str::contains("\"total_pages\": 2"))
        .stdout(predicate::str::contains("10.0.0.0/8").not());
}

#[test]
fn test_ranges_rejects_bad_size() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path());

    geocoder_cmd()
        .arg("-d")
        .arg(&db)
        .args(["ranges", "RU", "--size", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("size must be >= 1"));
}

#[test]
fn test_stream_ndjson() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path());

    let output = geocoder_cmd()
        .arg("-d")
        .arg(&db)
        .args(["stream", "RU", "US", "--chunk-size", "2"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let lines: Vec<serde_json::Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["iso_code"], "RU");
    assert_eq!(lines[0]["last"], false);
    assert_eq!(lines[1]["last"], true);
    assert_eq!(lines[2]["iso_code"], "US");
    assert_eq!(lines[2]["networks"][0], "2001:db8::/32");
}

#[test]
fn test_stream_unknown_code_emits_nothing() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path());

    geocoder_cmd()
        .arg("-d")
        .arg(&db)
        .args(["stream", "RU", "XX"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_ip_lookup() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path());

    geocoder_cmd()
        .arg("-d")
        .arg(&db)
        .args(["ip", "11.2.3.4", "203.0.113.9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"iso_code\": \"RU\""))
        .stdout(predicate::str::contains("\"iso_code\": \"ZZ\""));
}

#[test]
fn test_build_rejects_bad_network() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("bad.csv");
    fs::write(&csv, "10.0.0.0,RU\n").unwrap();

    geocoder_cmd()
        .arg("build")
        .arg(&csv)
        .arg("-o")
        .arg(dir.path().join("out.mmdb"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid network at row 1"));
}
