use serde_json::Value;
use std::{fmt::Write as _, fs, path::Path, process::Command};

const BINARY: &str = env!("CARGO_BIN_EXE_etlbench");

/// A small santander training file with repeated values in every variable
fn write_santander(path: &Path) {
    let mut csv = String::from("ID_code,target");
    for variable in 0..200 {
        write!(csv, ",var_{variable}").unwrap();
    }
    csv.push('\n');

    for row in 0..12 {
        write!(csv, "train_{row},{}", row % 2).unwrap();
        for variable in 0..200 {
            write!(csv, ",{}", ((row + variable) % 5) as f64 * 0.5).unwrap();
        }
        csv.push('\n');
    }

    fs::write(path, csv).unwrap();
}

#[test]
fn santander_etl_writes_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("train.csv");
    let results = dir.path().join("results.json");
    write_santander(&data);

    let output = Command::new(BINARY)
        .args(["--bench", "santander", "--no-ml", "-f"])
        .arg(&data)
        .arg("--results-json")
        .arg(&results)
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("DuckDB times:"));
    assert!(stdout.contains("Polars eager times:"));
    assert!(stdout.contains("Validation passed"));

    let report: Value = serde_json::from_str(&fs::read_to_string(&results).unwrap()).unwrap();
    assert_eq!(report["ETL"][0]["Backend"], "DuckDB");
    assert_eq!(report["ML"], serde_json::json!([null, null]));
    assert_eq!(report["validation"], true);
}

#[test]
fn query_engine_can_be_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("train.csv");
    write_santander(&data);

    let output = Command::new(BINARY)
        .args(["--bench", "santander", "--no-ml", "--no-query-engine", "--mode", "Modin_on_ray", "-f"])
        .arg(&data)
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Polars lazy times:"));
    assert!(!stdout.contains("DuckDB"));
}

#[test]
fn unknown_mode_fails() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("train.csv");
    write_santander(&data);

    let output = Command::new(BINARY)
        .args(["--bench", "santander", "--mode", "spark", "-f"])
        .arg(&data)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown dataframe mode spark"));
}

#[test]
fn missing_data_file_fails() {
    let output = Command::new(BINARY)
        .args(["--bench", "census", "-f", "/nonexistent/census.csv"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Data file not found"));
}
