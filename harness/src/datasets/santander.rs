//! Santander customer transaction prediction: frequency features per variable and
//! a binary boosted tree classifier.

use super::{load_timed, BenchError, Benchmark, Etl, MlOutcome};
use crate::{
    config::RunParameters,
    engine::Engine,
    ml::{
        boosting::{BoostingParams, EvalMetric, GradientBoosting, Objective},
        column_vector, dataframe_to_matrix, feature_columns, run_repeated,
        split::Split,
        MlParams, COD, ML_KEYS, MSE,
    },
    pipeline::{col, count_over, int, when, ColumnType, Expr, Operation, Pipeline, TableSpec},
    timer::Measurements,
};
use std::time::Instant;

pub const TABLE: &str = "train";

pub const ETL_KEYS: [&str; 2] = ["t_readcsv", "t_etl"];

const VARIABLES: usize = 200;

/// Rows at the end of the file used for validation
pub const VALIDATION_ROWS: usize = 10000;
/// Boosting rounds of the classifier, all of them are trained
const ROUNDS: usize = 10000;

fn variable(index: usize) -> String {
    format!("var_{index}")
}

pub fn table_spec() -> TableSpec {
    TableSpec::new(
        [
            ("ID_code".to_owned(), ColumnType::Utf8),
            ("target".to_owned(), ColumnType::Int64),
        ]
        .into_iter()
        .chain((0..VARIABLES).map(|index| (variable(index), ColumnType::Float64))),
    )
}

/// `var_i_count` is how often the value of `var_i` occurs, `var_i_gt1` keeps the
/// value only when it is not unique
pub fn pipeline(table: &str, variables: usize) -> Pipeline {
    let counts = (0..variables)
        .map(|index| {
            let name = variable(index);
            (format!("{name}_count"), count_over(name.clone(), name))
        })
        .collect();
    let repeated = (0..variables)
        .map(|index| {
            let name = variable(index);
            (
                format!("{name}_gt1"),
                when(col(format!("{name}_count")).gt(int(1)), col(name), Expr::Null),
            )
        })
        .collect();

    Pipeline::scan(table)
        .then(Operation::WithColumns(counts))
        .then(Operation::WithColumns(repeated))
}

pub fn boosting_params() -> BoostingParams {
    BoostingParams {
        max_depth: 1,
        eta: 0.1,
        subsample: 0.5,
        colsample: 0.05,
        rounds: ROUNDS,
        ..BoostingParams::new(Objective::Binary, EvalMetric::Auc)
    }
}

pub struct Santander;

impl Benchmark for Santander {
    type Prepared = ();

    fn etl(&self, engine: &mut dyn Engine, parameters: &RunParameters) -> Result<Etl<()>, BenchError> {
        let table = parameters.database.table.as_deref().unwrap_or(TABLE);
        let mut times = Measurements::new(ETL_KEYS);

        load_timed(engine, table, &parameters.data_file, &table_spec(), &mut times)?;

        let start = Instant::now();
        let frame = engine.execute(&pipeline(table, VARIABLES), &mut times)?;
        times.add("t_etl", start.elapsed());

        Ok(Etl {
            frames: vec![frame],
            times,
            prepared: (),
        })
    }

    fn ml(&self, etl: &Etl<()>, parameters: &RunParameters) -> Result<MlOutcome, BenchError> {
        let mut times = Measurements::new(ML_KEYS);
        let frame = &etl.frames[0];

        let start = Instant::now();
        let features = dataframe_to_matrix(frame, &feature_columns(frame, &["target", "ID_code"]))?;
        let labels = column_vector(frame, "target")?;
        times.add("t_dmatrix", start.elapsed());

        // the tail split does not depend on the seed, one run is enough
        let params = MlParams {
            runs: 1,
            test_size: 0.0,
            random_state: 0,
        }
        .with_overrides(&parameters.ml_overrides);

        let scores = run_repeated(
            features.view(),
            labels.view(),
            &params,
            &Split::Tail(VALIDATION_ROWS),
            &[MSE, COD],
            &mut times,
            |_| GradientBoosting::new(boosting_params()),
        )?;

        Ok(MlOutcome { times, scores })
    }

    fn sort_key(&self) -> Option<&'static str> {
        Some("ID_code")
    }
}
