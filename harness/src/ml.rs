pub mod boosting;
pub mod metrics;
pub mod ridge;
pub mod split;

use crate::{config::MlOverrides, timer::Measurements};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use polars::prelude::{DataFrame, DataType, PolarsError};
use split::Split;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum MlError {
    #[error("Polars Error")]
    Polars(#[from] PolarsError),
    #[error("Column {0} is missing")]
    MissingColumn(String),
    #[error("Feature matrix is singular")]
    Singular,
    #[error("Need at least {needed} rows, got {available}")]
    NotEnoughRows { needed: usize, available: usize },
    #[error("Feature matrix has no columns")]
    NoFeatures,
    #[error("Estimator was not fitted")]
    NotFitted,
    #[error("Label {0} is not a valid class index")]
    InvalidLabel(f64),
    #[error("Feature matrix has {features} columns, the model was fitted on {expected}")]
    FeatureMismatch { expected: usize, features: usize },
}

/// A model that is fitted on features and labels and predicts one value per row
pub trait Estimator {
    /// `eval` is an optional evaluation set used for early stopping
    fn fit(
        &mut self,
        features: ArrayView2<f64>,
        labels: ArrayView1<f64>,
        eval: Option<(ArrayView2<f64>, ArrayView1<f64>)>,
    ) -> Result<(), MlError>;

    fn predict(&self, features: ArrayView2<f64>) -> Result<Array1<f64>, MlError>;
}

/// Timing keys of the ML stage
pub const ML_KEYS: [&str; 5] = [
    "t_train_test_split",
    "t_ml",
    "t_train",
    "t_inference",
    "t_dmatrix",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MlParams {
    pub runs: usize,
    pub test_size: f64,
    pub random_state: u64,
}

impl MlParams {
    pub fn with_overrides(self, overrides: &MlOverrides) -> Self {
        Self {
            runs: overrides.runs.unwrap_or(self.runs),
            test_size: overrides.test_size.unwrap_or(self.test_size),
            random_state: overrides.random_state.unwrap_or(self.random_state),
        }
    }
}

/// Seed offset between repeated runs
pub const SEED_STEP: u64 = 777;

/// A named score of true labels against predictions
#[derive(Debug, Clone, Copy)]
pub struct Metric {
    pub name: &'static str,
    pub score: fn(ArrayView1<f64>, ArrayView1<f64>) -> f64,
}

pub const MSE: Metric = Metric {
    name: "mse",
    score: metrics::mse,
};

pub const COD: Metric = Metric {
    name: "cod",
    score: metrics::cod,
};

/// Convert `columns` of `frame` into a row major `f64` matrix, nulls become NaN
pub fn dataframe_to_matrix(frame: &DataFrame, columns: &[String]) -> Result<Array2<f64>, MlError> {
    let mut matrix = Array2::<f64>::zeros((frame.height(), columns.len()));

    for (mut target, name) in matrix.axis_iter_mut(Axis(1)).zip(columns) {
        let column = frame
            .column(name)
            .map_err(|_| MlError::MissingColumn(name.clone()))?
            .as_materialized_series()
            .cast(&DataType::Float64)?;

        for (cell, value) in target.iter_mut().zip(column.f64()?) {
            *cell = value.unwrap_or(f64::NAN);
        }
    }

    Ok(matrix)
}

/// All columns of `frame` except `excluded`, in frame order
pub fn feature_columns(frame: &DataFrame, excluded: &[&str]) -> Vec<String> {
    frame
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .filter(|name| !excluded.contains(&name.as_str()))
        .collect()
}

pub fn column_vector(frame: &DataFrame, name: &str) -> Result<Array1<f64>, MlError> {
    let matrix = dataframe_to_matrix(frame, &[name.to_owned()])?;

    Ok(matrix.column(0).to_owned())
}

/// Replace labels by their index among the sorted distinct labels.
/// Returns the encoded labels and the distinct labels.
pub fn encode_labels(labels: ArrayView1<f64>) -> (Array1<f64>, Vec<f64>) {
    let mut classes: Vec<f64> = labels.to_vec();
    classes.sort_by(f64::total_cmp);
    classes.dedup();

    let encoded = labels.mapv(|label| classes.partition_point(|class| *class < label) as f64);

    (encoded, classes)
}

/// Add `{name}_mean` and `{name}_dev` (Bessel corrected) for several runs, or the
/// plain value for a single one
fn summarize(scores: &mut Measurements, names: &[&str], values: &[Vec<f64>]) {
    if values.len() == 1 {
        for (index, name) in names.iter().enumerate() {
            scores.set(name, values[0][index]);
        }
        return;
    }

    let runs = values.len() as f64;
    let means: Vec<f64> = (0..names.len())
        .map(|index| values.iter().map(|run| run[index]).sum::<f64>() / runs)
        .collect();

    for (name, mean) in names.iter().zip(&means) {
        scores.set(&format!("{name}_mean"), *mean);
    }
    for (index, (name, mean)) in names.iter().zip(&means).enumerate() {
        let variance = values
            .iter()
            .map(|run| (run[index] - mean).powi(2))
            .sum::<f64>()
            / (runs - 1.0);
        scores.set(&format!("{name}_dev"), variance.sqrt());
    }
}

/// Split, fit and score `params.runs` times with seeds `random_state + k * 777`.
/// Split, training and inference time are added to `times`, `t_ml` is their sum
/// without the split.
#[instrument(skip_all, fields(runs = params.runs))]
pub fn run_repeated<E, F>(
    features: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    params: &MlParams,
    split: &Split,
    metrics: &[Metric],
    times: &mut Measurements,
    mut estimator: F,
) -> Result<Measurements, MlError>
where
    E: Estimator,
    F: FnMut(u64) -> E,
{
    let mut values = Vec::with_capacity(params.runs);

    for run in 0..params.runs.max(1) {
        let seed = params.random_state + run as u64 * SEED_STEP;

        let start = Instant::now();
        let indices = split.indices(labels, seed)?;
        let (train_features, train_labels) = (
            features.select(Axis(0), &indices.train),
            labels.select(Axis(0), &indices.train),
        );
        let (test_features, test_labels) = (
            features.select(Axis(0), &indices.test),
            labels.select(Axis(0), &indices.test),
        );
        times.add("t_train_test_split", start.elapsed());

        let mut model = estimator(seed);
        let start = Instant::now();
        model.fit(
            train_features.view(),
            train_labels.view(),
            Some((test_features.view(), test_labels.view())),
        )?;
        let train = start.elapsed();

        let start = Instant::now();
        let predicted = model.predict(test_features.view())?;
        let inference = start.elapsed();

        times.add("t_train", train);
        times.add("t_inference", inference);
        times.add("t_ml", train + inference);

        let scores: Vec<f64> = metrics
            .iter()
            .map(|metric| (metric.score)(test_labels.view(), predicted.view()))
            .collect();
        debug!(run, seed, ?scores, "Finished run");

        values.push(scores);
    }

    let names: Vec<&str> = metrics.iter().map(|metric| metric.name).collect();
    let mut scores = Measurements::default();
    summarize(&mut scores, &names, &values);

    info!("Finished {} runs", values.len());

    Ok(scores)
}
