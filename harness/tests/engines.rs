use etlbench::{
    backend::{DataFrameMode, ExecutionContext},
    config::DatabaseSettings,
    engine::{duckdb::DuckDbEngine, polars::PolarsEngine, Engine},
    pipeline::{Aggregation, ColumnType, Operation, Pipeline, Reducer, TableSpec},
    timer::Measurements,
    validation,
};
use polars::prelude::*;
use std::fs;

fn skew_by_group(engine: &mut dyn Engine) -> DataFrame {
    let pipeline = Pipeline::scan("fluxes").then(Operation::Aggregate {
        keys: vec!["group".to_owned()],
        aggregations: vec![Aggregation::of("flux", Reducer::Skew)],
    });

    let mut times = Measurements::new(Vec::<String>::new());
    engine.execute(&pipeline, &mut times).unwrap()
}

#[test]
fn skew_of_small_groups_is_null_on_both_engines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fluxes.csv");
    fs::write(
        &path,
        "group,flux\n1,5.0\n2,1.0\n2,3.0\n3,1.0\n3,2.0\n3,9.0\n4,1.0\n4,4.0\n4,2.0\n4,\n",
    )
    .unwrap();
    let spec = TableSpec::new([("group", ColumnType::Int32), ("flux", ColumnType::Float64)]);

    let mut polars = PolarsEngine::new(ExecutionContext::new(DataFrameMode::Eager, None, None));
    polars.load_table("fluxes", &path, &spec).unwrap();

    let mut duckdb = DuckDbEngine::open(&DatabaseSettings {
        path: ":memory:".to_owned(),
        table: None,
        delete_old_database: true,
        create_new_table: true,
        threads: Some(2),
        memory_limit: None,
    })
    .unwrap();
    duckdb.load_table("fluxes", &path, &spec).unwrap();

    let left = skew_by_group(&mut polars);
    let right = skew_by_group(&mut duckdb);

    let skews: Vec<Option<f64>> = left
        .column("flux_skew")
        .unwrap()
        .as_materialized_series()
        .f64()
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(skews.len(), 4);
    assert_eq!(&skews[..2], &[None, None]);
    // the null flux of group 4 leaves it with three values
    assert!(skews[2..].iter().all(|skew| skew.is_some_and(f64::is_finite)));

    let report = validation::compare(&left, &right, Some("group")).unwrap();
    assert!(report.is_equal(), "{:?}", report.mismatches);
}
