//! IPUMS census extract: cleaning and income scaling, then a ridge regression of
//! the education level.

use super::{load_timed, BenchError, Benchmark, Etl, MlOutcome};
use crate::{
    config::RunParameters,
    engine::Engine,
    ml::{
        column_vector, dataframe_to_matrix, feature_columns, ridge::Ridge, run_repeated,
        split::Split, MlParams, COD, ML_KEYS, MSE,
    },
    pipeline::{col, int, ColumnType, Operation, Pipeline, TableSpec},
    timer::Measurements,
};
use std::time::Instant;
use tracing::info;

pub const TABLE: &str = "census";

pub const ETL_KEYS: [&str; 2] = ["t_readcsv", "t_etl"];

pub const KEEP_COLUMNS: [&str; 24] = [
    "YEAR0",
    "DATANUM",
    "SERIAL",
    "CBSERIAL",
    "HHWT",
    "CPI99",
    "GQ",
    "PERNUM",
    "SEX",
    "AGE",
    "INCTOT",
    "EDUC",
    "EDUCD",
    "EDUC_HEAD",
    "EDUC_POP",
    "EDUC_MOM",
    "EDUCD_MOM2",
    "EDUCD_POP2",
    "INCTOT_MOM",
    "INCTOT_POP",
    "INCTOT_MOM2",
    "INCTOT_POP2",
    "INCTOT_HEAD",
    "SEX_HEAD",
];

const LABEL: &str = "EDUC";

pub const ML_PARAMS: MlParams = MlParams {
    runs: 50,
    test_size: 0.1,
    random_state: 777,
};

pub fn table_spec() -> TableSpec {
    use ColumnType::{Float64, Int64};

    let leading = [
        ("YEAR0", Int64),
        ("DATANUM", Int64),
        ("SERIAL", Int64),
        ("CBSERIAL", Float64),
        ("HHWT", Int64),
        ("CPI99", Float64),
        ("GQ", Int64),
        ("QGQ", Float64),
        ("PERNUM", Int64),
        ("PERWT", Int64),
        ("SEX", Int64),
        ("AGE", Int64),
        ("EDUC", Int64),
        ("EDUCD", Int64),
        ("INCTOT", Int64),
    ];
    let relatives = ["SEX", "AGE", "EDUC", "EDUCD", "INCTOT"]
        .into_iter()
        .flat_map(|base| {
            ["HEAD", "MOM", "POP", "SP", "MOM2", "POP2"]
                .into_iter()
                .map(move |relative| (format!("{base}_{relative}"), Float64))
        });

    TableSpec::new(
        leading
            .into_iter()
            .map(|(name, kind)| (name.to_owned(), kind))
            .chain(relatives),
    )
}

/// Keep the relevant columns, drop unknown income and education, scale income to
/// 1999 dollars and turn everything into floats with -1 for missing values
pub fn pipeline(table: &str) -> Pipeline {
    Pipeline::scan(table)
        .select(KEEP_COLUMNS)
        .filter(col("INCTOT").distinct_from(int(9999999)))
        .filter(col("EDUC").is_not_null().and(col("EDUC").not_equal(int(-1))))
        .filter(col("EDUCD").is_not_null().and(col("EDUCD").not_equal(int(-1))))
        .then(Operation::WithColumns(vec![(
            "INCTOT".to_owned(),
            col("INCTOT") * col("CPI99"),
        )]))
        .then(Operation::WithColumns(
            KEEP_COLUMNS
                .iter()
                .map(|name| {
                    (
                        name.to_string(),
                        col(*name).fill_null(int(-1)).cast(ColumnType::Float64),
                    )
                })
                .collect(),
        ))
}

pub struct Census;

impl Benchmark for Census {
    type Prepared = ();

    fn etl(&self, engine: &mut dyn Engine, parameters: &RunParameters) -> Result<Etl<()>, BenchError> {
        let table = parameters.database.table.as_deref().unwrap_or(TABLE);
        let mut times = Measurements::new(ETL_KEYS);

        load_timed(engine, table, &parameters.data_file, &table_spec(), &mut times)?;

        let start = Instant::now();
        let frame = engine.execute(&pipeline(table), &mut times)?;
        times.add("t_etl", start.elapsed());

        let (rows, columns) = frame.shape();
        info!(rows, columns, "Cleaned frame shape");

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
        let features = dataframe_to_matrix(frame, &feature_columns(frame, &[LABEL, "CPI99"]))?;
        let labels = column_vector(frame, LABEL)?;
        times.add("t_dmatrix", start.elapsed());

        let params = ML_PARAMS.with_overrides(&parameters.ml_overrides);
        let scores = run_repeated(
            features.view(),
            labels.view(),
            &params,
            &Split::Random {
                test_size: params.test_size,
            },
            &[MSE, COD],
            &mut times,
            |_| Ridge::default(),
        )?;

        Ok(MlOutcome { times, scores })
    }
}
