//! Cross-backend comparison of ETL results.

use crate::timer::Measurements;
use polars::prelude::*;
use std::fmt::{self, Display};

/// Largest relative difference in percent for two numbers to count as equal
pub const TOLERANCE_PERCENT: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub column: Option<String>,
    pub rows: usize,
    pub detail: String,
}

impl Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "{column}: {} rows differ, {}", self.rows, self.detail),
            None => f.write_str(&self.detail),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub mismatches: Vec<Mismatch>,
}

impl ValidationReport {
    pub fn is_equal(&self) -> bool {
        self.mismatches.is_empty()
    }

    fn frame_mismatch(&mut self, detail: String) {
        self.mismatches.push(Mismatch {
            column: None,
            rows: 0,
            detail,
        });
    }
}

impl Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_equal() {
            return writeln!(f, "Validation passed");
        }

        writeln!(f, "Validation failed:")?;
        for mismatch in &self.mismatches {
            writeln!(f, "  {mismatch}")?;
        }

        Ok(())
    }
}

pub fn numbers_match(left: f64, right: f64) -> bool {
    if left.is_nan() || right.is_nan() {
        return left.is_nan() && right.is_nan();
    }
    if left == right {
        return true;
    }

    (left - right).abs() / left.abs().max(right.abs()) * 100.0 <= TOLERANCE_PERCENT
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

fn sorted(frame: &DataFrame, key: Option<&str>) -> PolarsResult<DataFrame> {
    match key {
        Some(key) => frame
            .clone()
            .lazy()
            .sort_by_exprs([col(key)], SortMultipleOptions::default())
            .collect(),
        None => Ok(frame.clone()),
    }
}

/// Indices of differing rows with a printable description of the first one
fn compare_numbers(left: &Column, right: &Column) -> PolarsResult<(usize, Option<String>)> {
    let left = left.as_materialized_series().cast(&DataType::Float64)?;
    let right = right.as_materialized_series().cast(&DataType::Float64)?;

    let mut differing = 0;
    let mut first = None;

    for (row, pair) in left.f64()?.into_iter().zip(right.f64()?).enumerate() {
        let equal = match pair {
            (None, None) => true,
            (Some(a), Some(b)) => numbers_match(a, b),
            _ => false,
        };

        if !equal {
            differing += 1;
            first.get_or_insert_with(|| format!("first at row {row}: {:?} vs {:?}", pair.0, pair.1));
        }
    }

    Ok((differing, first))
}

fn compare_strings(left: &Column, right: &Column) -> PolarsResult<(usize, Option<String>)> {
    let left = left.as_materialized_series().cast(&DataType::String)?;
    let right = right.as_materialized_series().cast(&DataType::String)?;

    let mut differing = 0;
    let mut first = None;

    for (row, (a, b)) in left.str()?.into_iter().zip(right.str()?).enumerate() {
        if a != b {
            differing += 1;
            first.get_or_insert_with(|| format!("first at row {row}: {a:?} vs {b:?}"));
        }
    }

    Ok((differing, first))
}

/// Compare two ETL results: same shape and column names, numeric columns within
/// `TOLERANCE_PERCENT` with matching null positions, everything else exactly.
/// With `sort_by` both frames are sorted by that column first.
pub fn compare(
    left: &DataFrame,
    right: &DataFrame,
    sort_by: Option<&str>,
) -> PolarsResult<ValidationReport> {
    let mut report = ValidationReport::default();

    if left.shape() != right.shape() {
        report.frame_mismatch(format!(
            "shapes differ: {:?} vs {:?}",
            left.shape(),
            right.shape()
        ));
        return Ok(report);
    }
    if left.get_column_names() != right.get_column_names() {
        report.frame_mismatch(format!(
            "column names differ: {:?} vs {:?}",
            left.get_column_names(),
            right.get_column_names()
        ));
        return Ok(report);
    }

    let (left, right) = (sorted(left, sort_by)?, sorted(right, sort_by)?);

    for (a, b) in left.get_columns().iter().zip(right.get_columns()) {
        let (rows, first) = if is_numeric(a.dtype()) && is_numeric(b.dtype()) {
            compare_numbers(a, b)?
        } else {
            compare_strings(a, b)?
        };

        if let Some(detail) = first {
            report.mismatches.push(Mismatch {
                column: Some(a.name().to_string()),
                rows,
                detail,
            });
        }
    }

    Ok(report)
}

/// Compare the ML scores of two backends by name with `numbers_match`
pub fn compare_scores(left: &Measurements, right: &Measurements) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (name, expected) in left.iter() {
        let detail = match right.get(name) {
            Some(actual) if numbers_match(expected, actual) => continue,
            Some(actual) => format!("{expected} vs {actual}"),
            None => format!("{expected} vs missing"),
        };

        report.mismatches.push(Mismatch {
            column: Some(name.to_owned()),
            rows: 1,
            detail,
        });
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tolerance_is_relative() {
        assert!(numbers_match(1000.0, 1000.4));
        assert!(!numbers_match(1000.0, 1010.0));
        assert!(numbers_match(f64::NAN, f64::NAN));
        assert!(!numbers_match(f64::NAN, 0.0));
        assert!(numbers_match(0.0, 0.0));
    }

    #[test]
    fn mixed_integer_and_float_columns_compare_numerically() {
        let left = df!("a" => [1i64, 2, 3], "b" => [0.5f64, 1.0, 2.0]).unwrap();
        let right = df!("a" => [1.0f64, 2.0, 3.0005], "b" => [0.5f32, 1.0, 2.0]).unwrap();

        let report = compare(&left, &right, None).unwrap();

        assert!(report.is_equal(), "{report}");
    }

    #[test]
    fn one_percent_difference_is_reported() {
        let left = df!("a" => [100.0f64, 200.0, 300.0]).unwrap();
        let right = df!("a" => [100.0f64, 202.0, 303.0]).unwrap();

        let report = compare(&left, &right, None).unwrap();

        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].column.as_deref(), Some("a"));
        assert_eq!(report.mismatches[0].rows, 2);
    }

    #[test]
    fn strings_must_match_exactly() {
        let left = df!("id" => ["ID_1", "ID_2"]).unwrap();
        let right = df!("id" => ["ID_1", "id_2"]).unwrap();

        assert!(!compare(&left, &right, None).unwrap().is_equal());
    }

    #[test]
    fn null_positions_must_match() {
        let left = df!("a" => [Some(1.0f64), None]).unwrap();
        let right = df!("a" => [None, Some(1.0f64)]).unwrap();
        let same = df!("a" => [Some(1.0f64), None]).unwrap();

        assert!(!compare(&left, &right, None).unwrap().is_equal());
        assert!(compare(&left, &same, None).unwrap().is_equal());
    }

    #[test]
    fn sort_key_aligns_rows() {
        let left = df!("id" => [2i32, 1], "v" => [20.0f64, 10.0]).unwrap();
        let right = df!("id" => [1i32, 2], "v" => [10.0f64, 20.0]).unwrap();

        assert!(!compare(&left, &right, None).unwrap().is_equal());
        assert!(compare(&left, &right, Some("id")).unwrap().is_equal());
    }

    #[test]
    fn shape_and_names_are_checked_first() {
        let left = df!("a" => [1i32, 2]).unwrap();

        let report = compare(&left, &df!("a" => [1i32]).unwrap(), None).unwrap();
        assert_eq!(report.mismatches[0].column, None);

        let report = compare(&left, &df!("b" => [1i32, 2]).unwrap(), None).unwrap();
        assert!(report.to_string().contains("column names differ"));
    }

    #[test]
    fn scores_compare_by_name_within_tolerance() {
        let mut left = Measurements::default().with_backend("DuckDB");
        left.set("mse_mean", 0.5);
        left.set("cod_mean", 0.9);
        let mut right = Measurements::default().with_backend("Polars eager");
        right.set("cod_mean", 0.90001);
        right.set("mse_mean", 0.5);

        assert!(compare_scores(&left, &right).is_equal());

        right.set("cod_mean", 0.8);
        let report = compare_scores(&left, &right);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].column.as_deref(), Some("cod_mean"));

        left.set("mse_dev", 0.1);
        assert_eq!(compare_scores(&left, &right).mismatches.len(), 2);
    }
}
