//! PLAsTiCC astronomical classification: per object light curve aggregates joined
//! to the object metadata, then a multi-class boosted tree classifier.

use super::{load_timed, BenchError, Benchmark, Etl, MlOutcome};
use crate::{
    config::RunParameters,
    engine::Engine,
    ml::{
        boosting::{BoostingParams, EvalMetric, GradientBoosting, Objective},
        column_vector, dataframe_to_matrix, encode_labels, feature_columns,
        metrics::multi_weighted_logloss,
        split::Split,
        Estimator, MlError, MlParams,
    },
    pipeline::{col, Aggregation, ColumnType, Operation, Pipeline, Reducer, TableSpec},
    timer::Measurements,
};
use ndarray::{Array1, Axis};
use polars::prelude::{DataFrame, IdxCa, IdxSize};
use std::time::Instant;
use tracing::info;

pub const ETL_KEYS: [&str; 7] = [
    "t_readcsv",
    "t_groupby_agg",
    "t_merge",
    "t_arithm",
    "t_drop",
    "t_train_test_split",
    "t_etl",
];

pub const ML_KEYS: [&str; 4] = ["t_dmatrix", "t_train", "t_inference", "t_ml"];

/// Rows of the full test light curve file
const TEST_ROWS: f64 = 453653104.0;
const MEMORY_OVERHEAD: f64 = 1.2;

/// Classes weighted twice in the loss
const HEAVY_CLASSES: [f64; 2] = [15.0, 64.0];

pub const ML_PARAMS: MlParams = MlParams {
    runs: 1,
    test_size: 0.1,
    random_state: 126,
};

/// Test light curve rows skipped to fit `gpu_memory` GiB, at least the header line
pub fn skip_rows(gpu_memory: f64) -> usize {
    let rows = (1.0 - gpu_memory / (32.0 * MEMORY_OVERHEAD)) * TEST_ROWS;

    (rows as usize).max(1)
}

pub fn lightcurve_spec() -> TableSpec {
    TableSpec::new([
        ("object_id", ColumnType::Int32),
        ("mjd", ColumnType::Float32),
        ("passband", ColumnType::Int32),
        ("flux", ColumnType::Float32),
        ("flux_err", ColumnType::Float32),
        ("detected", ColumnType::Int32),
    ])
}

pub fn metadata_spec(with_target: bool) -> TableSpec {
    let mut columns = vec![("object_id", ColumnType::Int32)];
    columns.extend(["ra", "decl", "gal_l", "gal_b"].map(|name| (name, ColumnType::Float32)));
    columns.push(("ddf", ColumnType::Int32));
    columns.extend(
        ["hostgal_specz", "hostgal_photoz", "hostgal_photoz_err", "distmod", "mwebv"]
            .map(|name| (name, ColumnType::Float32)),
    );
    if with_target {
        columns.push(("target", ColumnType::Int32));
    }

    TableSpec::new(columns)
}

fn names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|name| name.to_string()).collect()
}

/// Per object aggregates of the light curves
pub fn aggregates(lightcurves: &str) -> Pipeline {
    use Reducer::*;

    let aggregations = [
        ("passband", Mean),
        ("flux", Min),
        ("flux", Max),
        ("flux", Mean),
        ("flux", Skew),
        ("flux_err", Min),
        ("flux_err", Max),
        ("flux_err", Mean),
        ("detected", Mean),
        ("mjd", Max),
        ("mjd", Min),
        ("flux_ratio_sq", Sum),
        ("flux_by_flux_ratio_sq", Sum),
    ]
    .into_iter()
    .map(|(column, reducer)| Aggregation::of(column, reducer))
    .collect();

    let flux_diff = || col("flux_max") - col("flux_min");
    let flux_w_mean = || col("flux_by_flux_ratio_sq_sum") / col("flux_ratio_sq_sum");

    Pipeline::scan(lightcurves)
        .staged(
            "t_arithm",
            Operation::WithColumns(vec![(
                "flux_ratio_sq".to_owned(),
                (col("flux") / col("flux_err")).pow(2.0),
            )]),
        )
        .staged(
            "t_arithm",
            Operation::WithColumns(vec![(
                "flux_by_flux_ratio_sq".to_owned(),
                col("flux") * col("flux_ratio_sq"),
            )]),
        )
        .staged(
            "t_groupby_agg",
            Operation::Aggregate {
                keys: names(&["object_id"]),
                aggregations,
            },
        )
        .staged(
            "t_arithm",
            Operation::WithColumns(vec![
                ("flux_diff".to_owned(), flux_diff()),
                ("flux_dif2".to_owned(), flux_diff() / col("flux_mean")),
                ("flux_w_mean".to_owned(), flux_w_mean()),
                ("flux_dif3".to_owned(), flux_diff() / flux_w_mean()),
                ("mjd_diff".to_owned(), col("mjd_max") - col("mjd_min")),
            ]),
        )
        .staged("t_drop", Operation::Drop(names(&["mjd_max", "mjd_min"])))
}

/// Metadata without sky coordinates, left joined with the light curve aggregates
pub fn pipeline(lightcurves: &str, metadata: &str) -> Pipeline {
    Pipeline::scan(metadata)
        .staged("t_drop", Operation::Drop(names(&["ra", "decl", "gal_l", "gal_b"])))
        .staged(
            "t_merge",
            Operation::LeftJoin {
                right: Box::new(aggregates(lightcurves)),
                on: "object_id".to_owned(),
            },
        )
}

/// Training, validation and test features ready for the classifier
pub struct Prepared {
    pub train: DataFrame,
    pub train_labels: Array1<f64>,
    pub valid: DataFrame,
    pub valid_labels: Array1<f64>,
    pub test: DataFrame,
    pub classes: Vec<f64>,
    /// one weight per encoded class
    pub weights: Vec<f64>,
}

fn take(frame: &DataFrame, rows: &[usize]) -> Result<DataFrame, BenchError> {
    let indices = IdxCa::from_vec(
        "rows".into(),
        rows.iter().map(|&row| row as IdxSize).collect(),
    );

    Ok(frame.take(&indices)?)
}

/// Drop identifiers, encode labels and split off a stratified validation set
fn split_step(
    train: &DataFrame,
    test: &DataFrame,
    params: &MlParams,
    times: &mut Measurements,
) -> Result<Prepared, BenchError> {
    let etl_start = Instant::now();

    let start = Instant::now();
    let features = train.select(feature_columns(train, &["object_id", "target"]))?;
    let test_features = test.select(feature_columns(test, &["object_id"]))?;
    times.add("t_drop", start.elapsed());

    if features.width() != test_features.width() {
        return Err(MlError::FeatureMismatch {
            expected: features.width(),
            features: test_features.width(),
        }
        .into());
    }

    let (labels, classes) = encode_labels(column_vector(train, "target")?.view());
    let weights = classes
        .iter()
        .map(|class| if HEAVY_CLASSES.contains(class) { 2.0 } else { 1.0 })
        .collect();

    let start = Instant::now();
    let indices = Split::Stratified {
        test_size: params.test_size,
    }
    .indices(labels.view(), params.random_state)?;
    let prepared = Prepared {
        train: take(&features, &indices.train)?,
        train_labels: labels.select(Axis(0), &indices.train),
        valid: take(&features, &indices.test)?,
        valid_labels: labels.select(Axis(0), &indices.test),
        test: test_features,
        classes,
        weights,
    };
    times.add("t_train_test_split", start.elapsed());
    times.add("t_etl", etl_start.elapsed());

    Ok(prepared)
}

pub fn boosting_params(classes: usize, weights: Vec<f64>) -> BoostingParams {
    BoostingParams {
        max_depth: 7,
        subsample: 0.7,
        colsample: 0.7,
        rounds: 60,
        ..BoostingParams::new(
            Objective::MultiClass { classes },
            EvalMetric::MultiWeightedLogloss(weights),
        )
    }
}

pub struct Plasticc;

impl Benchmark for Plasticc {
    type Prepared = Prepared;

    fn etl(
        &self,
        engine: &mut dyn Engine,
        parameters: &RunParameters,
    ) -> Result<Etl<Prepared>, BenchError> {
        let directory = &parameters.data_file;
        let mut times = Measurements::new(ETL_KEYS);
        let skip = skip_rows(parameters.gpu_memory);
        info!(skip, "Skipping test set rows");

        let tables = [
            ("training_set", lightcurve_spec()),
            ("test_set", lightcurve_spec().without_header(skip)),
            ("training_set_metadata", metadata_spec(true)),
            ("test_set_metadata", metadata_spec(false)),
        ];
        for (name, spec) in &tables {
            load_timed(engine, name, &directory.join(format!("{name}.csv")), spec, &mut times)?;
        }

        let mut finals = Vec::with_capacity(2);
        for (lightcurves, metadata) in [
            ("training_set", "training_set_metadata"),
            ("test_set", "test_set_metadata"),
        ] {
            let start = Instant::now();
            finals.push(engine.execute(&pipeline(lightcurves, metadata), &mut times)?);
            times.add("t_etl", start.elapsed());
        }

        let params = ML_PARAMS.with_overrides(&parameters.ml_overrides);
        let prepared = split_step(&finals[0], &finals[1], &params, &mut times)?;

        Ok(Etl {
            frames: finals,
            times,
            prepared,
        })
    }

    fn ml(&self, etl: &Etl<Prepared>, _parameters: &RunParameters) -> Result<MlOutcome, BenchError> {
        let data = &etl.prepared;
        let mut times = Measurements::new(ML_KEYS);
        let ml_start = Instant::now();

        let matrix = |frame: &DataFrame| dataframe_to_matrix(frame, &feature_columns(frame, &[]));
        let start = Instant::now();
        let (train, valid, test) = (matrix(&data.train)?, matrix(&data.valid)?, matrix(&data.test)?);
        times.add("t_dmatrix", start.elapsed());

        let mut model = GradientBoosting::new(boosting_params(data.classes.len(), data.weights.clone()));
        let start = Instant::now();
        model.fit(
            train.view(),
            data.train_labels.view(),
            Some((valid.view(), data.valid_labels.view())),
        )?;
        times.add("t_train", start.elapsed());

        let start = Instant::now();
        let valid_probabilities = model.predict_proba(valid.view())?;
        times.add("t_inference", start.elapsed());

        let loss = multi_weighted_logloss(
            data.valid_labels.view(),
            valid_probabilities.view(),
            &data.weights,
        );

        let start = Instant::now();
        let submission = model.predict_proba(test.view())?;
        times.add("t_inference", start.elapsed());
        times.set("t_ml", ml_start.elapsed().as_secs_f64());

        info!(
            models = model.models(),
            test_rows = submission.nrows(),
            "validation loss: {loss}"
        );

        let mut scores = Measurements::default();
        scores.set("wloss", loss);

        Ok(MlOutcome { times, scores })
    }

    fn sort_key(&self) -> Option<&'static str> {
        Some("object_id")
    }
}
