pub mod duckdb;
pub mod polars;

use crate::{
    pipeline::{Pipeline, TableSpec},
    timer::Measurements,
};
use ::polars::prelude::{DataFrame, PolarsError};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Polars Error")]
    Polars(#[from] PolarsError),
    #[error("DuckDB Error")]
    DuckDB(#[from] ::duckdb::Error),
    #[error("Table {0} was not loaded")]
    UnknownTable(String),
    #[error("Column {column} has unsupported type {kind}")]
    UnsupportedType { column: String, kind: String },
    #[error("Failed to remove old database {path}")]
    RemoveDatabase {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One backend able to load CSV tables and run pipelines over them
pub trait Engine {
    /// Backend label used in reports
    fn label(&self) -> String;

    /// Load `path` as table `name`
    fn load_table(&mut self, name: &str, path: &Path, spec: &TableSpec) -> Result<(), EngineError>;

    /// Run `pipeline` and materialize its result in input order. Steps tagged with a
    /// stage are added to `times` when the backend can attribute time to them.
    fn execute(
        &mut self,
        pipeline: &Pipeline,
        times: &mut Measurements,
    ) -> Result<DataFrame, EngineError>;
}
