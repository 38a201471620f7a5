use crate::ingest::ResultRow;
use std::{fs::File, io::Write, path::Path};
use thiserror::Error;

pub const REPORT_HEADER: [&str; 10] = [
    "datafiles",
    "fragment_size",
    "query",
    "query_exec_min",
    "query_total_min",
    "query_exec_max",
    "query_total_max",
    "query_exec_avg",
    "query_total_avg",
    "query_error_info",
];

/// Written for a null value in the results file
pub const MISSING: &str = "None";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write CSV report")]
    Csv(#[from] csv::Error),
    #[error("Failed to flush CSV report")]
    Flush(#[from] std::io::Error),
}

/// CSV report, every row is flushed as soon as it is written
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl ReportWriter<File> {
    pub fn create(path: &Path) -> Result<Self, ReportError> {
        Self::new(File::create(path)?)
    }
}

impl<W: Write> ReportWriter<W> {
    pub fn new(inner: W) -> Result<Self, ReportError> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(REPORT_HEADER)?;
        writer.flush()?;

        Ok(Self { writer })
    }

    pub fn write(&mut self, row: &ResultRow) -> Result<(), ReportError> {
        let results = &row.result.results;
        let mut record = vec![
            row.datafiles.to_string(),
            row.fragment_size.to_string(),
            row.result.name.clone(),
        ];

        record.extend(
            results
                .timings()
                .into_iter()
                .map(|value| value.map_or_else(|| MISSING.to_owned(), |value| value.to_string())),
        );
        record.push(results.query_error_info.clone().unwrap_or_else(|| MISSING.to_owned()));

        self.writer.write_record(&record)?;
        self.writer.flush()?;

        Ok(())
    }

    pub fn into_inner(self) -> Result<W, ReportError> {
        self.writer
            .into_inner()
            .map_err(|error| ReportError::Flush(std::io::Error::new(error.error().kind(), error.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::load_results;
    use pretty_assertions::assert_eq;

    #[test]
    fn writes_row_from_results_file() {
        let dir = tempfile::tempdir().unwrap();
        let results_file = dir.path().join("benchmark.json");
        std::fs::write(
            &results_file,
            r#"[{"name": "q1", "results": {
                "query_exec_min": 12, "query_total_min": 15,
                "query_exec_max": 20, "query_total_max": 24,
                "query_exec_avg": 16, "query_total_avg": 19,
                "query_error_info": null}}]"#,
        )
        .unwrap();

        let report_file = dir.path().join("report.csv");
        let mut report = ReportWriter::create(&report_file).unwrap();

        for result in load_results(&results_file).unwrap().iter() {
            report
                .write(&ResultRow {
                    datafiles: 3,
                    fragment_size: 0,
                    result,
                })
                .unwrap();
        }

        // rows are flushed immediately, the file is complete while the writer lives
        let content = std::fs::read_to_string(&report_file).unwrap();
        assert_eq!(
            content,
            "datafiles,fragment_size,query,query_exec_min,query_total_min,query_exec_max,\
             query_total_max,query_exec_avg,query_total_avg,query_error_info\n\
             3,0,q1,12,15,20,24,16,19,None\n"
        );
    }

    #[test]
    fn error_info_is_quoted_when_needed() {
        let result = crate::ingest::parse_results(
            r#"[{"name": "q2", "results": {
                "query_exec_min": null, "query_total_min": null,
                "query_exec_max": null, "query_total_max": null,
                "query_exec_avg": null, "query_total_avg": null,
                "query_error_info": "failed, retry"}}]"#,
        )
        .unwrap();

        let mut report = ReportWriter::new(Vec::new()).unwrap();
        report
            .write(&ResultRow {
                datafiles: 0,
                fragment_size: 1000,
                result: &result[0],
            })
            .unwrap();

        let content = String::from_utf8(report.into_inner().unwrap()).unwrap();
        assert_eq!(
            content.lines().nth(1),
            Some("0,1000,q2,None,None,None,None,None,None,\"failed, retry\"")
        );
    }
}
