use crate::timer::Measurements;
use serde::Serialize;
use std::{fs, path::Path};
use thiserror::Error;
use tracing::info;

/// Slot of the query engine backend in every report list
pub const QUERY_ENGINE: usize = 0;
/// Slot of the dataframe backend in every report list
pub const DATAFRAME: usize = 1;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to serialize the run report")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write the run report to {path}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Timings and scores of one benchmark run, a `null` slot for a backend that did not run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    #[serde(rename = "ETL")]
    pub etl: [Option<Measurements>; 2],
    #[serde(rename = "ML")]
    pub ml: [Option<Measurements>; 2],
    pub scores: [Option<Measurements>; 2],
    /// whether the ETL results of both backends matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<bool>,
    /// whether the ML scores of both backends matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores_equal: Option<bool>,
}

impl RunReport {
    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        fs::write(path, self.to_json()?).map_err(|source| ReportError::Write {
            path: path.display().to_string(),
            source,
        })?;

        info!("Wrote run report to {}", path.display());

        Ok(())
    }
}
