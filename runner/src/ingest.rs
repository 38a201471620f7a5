use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum IngestorError {
    #[error("Failed to read benchmark results from {path}")]
    ReadResults {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to deserialize benchmark results")]
    DeserializeResults(#[from] serde_json::Error),
}

/// Timings of one query as written by the benchmark scripts, in milliseconds.
/// Values are kept as written, a failed query may leave them empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    pub query_exec_min: Option<Number>,
    pub query_total_min: Option<Number>,
    pub query_exec_max: Option<Number>,
    pub query_total_max: Option<Number>,
    pub query_exec_avg: Option<Number>,
    pub query_total_avg: Option<Number>,
    #[serde(default)]
    pub query_error_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub name: String,
    pub results: QueryResults,
}

/// One report row: a query result together with the run it belongs to
#[derive(Debug, Clone, Copy)]
pub struct ResultRow<'a> {
    pub datafiles: usize,
    pub fragment_size: u64,
    pub result: &'a BenchmarkResult,
}

pub fn parse_results(content: &str) -> Result<Vec<BenchmarkResult>, IngestorError> {
    match serde_json::from_str(content) {
        Ok(results) => Ok(results),
        Err(error) => {
            error!(error = ?error, "Failed to deserialize benchmark results");

            Err(IngestorError::DeserializeResults(error))
        }
    }
}

#[tracing::instrument(level = "debug")]
pub fn load_results(path: &Path) -> Result<Vec<BenchmarkResult>, IngestorError> {
    let content = fs::read_to_string(path).map_err(|source| IngestorError::ReadResults {
        path: path.to_path_buf(),
        source,
    })?;
    let results = parse_results(&content)?;

    debug!("Loaded {} query results", results.len());

    Ok(results)
}

impl QueryResults {
    /// timings in report column order: exec/total for min, max and avg
    pub fn timings(&self) -> [Option<&Number>; 6] {
        [
            self.query_exec_min.as_ref(),
            self.query_total_min.as_ref(),
            self.query_exec_max.as_ref(),
            self.query_total_max.as_ref(),
            self.query_exec_avg.as_ref(),
            self.query_total_avg.as_ref(),
        ]
    }
}

/// Whole milliseconds for the integer columns of the reporting sinks
pub fn as_millis(value: Option<&Number>) -> Option<u64> {
    let value = value?;

    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RESULTS: &str = r#"[
        {
            "name": "q1",
            "results": {
                "query_exec_min": 12,
                "query_total_min": 15,
                "query_exec_max": 20,
                "query_total_max": 24.5,
                "query_exec_avg": 16,
                "query_total_avg": 19,
                "query_error_info": null
            }
        },
        {
            "name": "q2",
            "results": {
                "query_exec_min": null,
                "query_total_min": null,
                "query_exec_max": null,
                "query_total_max": null,
                "query_exec_avg": null,
                "query_total_avg": null,
                "query_error_info": "Exception: table not found"
            }
        }
    ]"#;

    #[test]
    fn parses_results_with_errors() {
        let results = parse_results(RESULTS).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "q1");
        assert_eq!(
            results[0].results.query_total_max.as_ref().map(ToString::to_string),
            Some("24.5".to_owned())
        );
        assert_eq!(results[0].results.query_error_info, None);
        assert_eq!(
            results[1].results.query_error_info.as_deref(),
            Some("Exception: table not found")
        );
        assert!(results[1].results.timings().iter().all(Option::is_none));
    }

    #[test]
    fn millis_round_floats() {
        let results = parse_results(RESULTS).unwrap();
        let timings = results[0].results.timings();

        assert_eq!(as_millis(timings[0]), Some(12));
        assert_eq!(as_millis(timings[3]), Some(25));
        assert_eq!(as_millis(None), None);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            load_results(&dir.path().join("benchmark.json")),
            Err(IngestorError::ReadResults { .. })
        ));
    }

    #[test]
    fn malformed_results_are_rejected() {
        assert!(matches!(
            parse_results(r#"{"name": "q1"}"#),
            Err(IngestorError::DeserializeResults(_))
        ));
    }
}
