use super::{Engine, EngineError};
use crate::{
    config::DatabaseSettings,
    pipeline::{Aggregation, Expr, Operation, Pipeline, Reducer, TableSpec, MIN_SKEW_COUNT},
    timer::Measurements,
};
use duckdb::{params, types::ValueRef, Connection};
use itertools::Itertools;
use polars::prelude::{Column, DataFrame, NamedFrom, Series};
use std::{fs, io, path::Path, time::Instant};
use tracing::{debug, info, instrument};

pub const IN_MEMORY: &str = ":memory:";
const ROW_ID: &str = "__row";

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn column_list<'a>(names: impl IntoIterator<Item = &'a String>) -> String {
    names.into_iter().map(|name| quote(name)).join(", ")
}

fn compile(expr: &Expr) -> String {
    match expr {
        Expr::Column(name) => quote(name),
        Expr::Int(value) => value.to_string(),
        Expr::Float(value) => format!("CAST({value:?} AS DOUBLE)"),
        Expr::Null => "NULL".to_owned(),
        Expr::Binary { op, left, right } => {
            format!("({} {} {})", compile(left), op.sql(), compile(right))
        }
        Expr::DistinctFrom(left, right) => {
            format!("({} IS DISTINCT FROM {})", compile(left), compile(right))
        }
        Expr::Pow(base, exponent) => format!("pow({}, {exponent:?})", compile(base)),
        Expr::IsNotNull(inner) => format!("({} IS NOT NULL)", compile(inner)),
        Expr::FillNull(inner, value) => format!("coalesce({}, {})", compile(inner), compile(value)),
        Expr::Cast(inner, kind) => format!("CAST({} AS {})", compile(inner), kind.sql()),
        Expr::When {
            condition,
            then,
            otherwise,
        } => format!(
            "CASE WHEN {} THEN {} ELSE {} END",
            compile(condition),
            compile(then),
            compile(otherwise)
        ),
        Expr::CountOver { column, partition } => {
            format!("count({}) OVER (PARTITION BY {})", quote(column), quote(partition))
        }
    }
}

fn reduce(aggregation: &Aggregation) -> String {
    let input = compile(&aggregation.input);

    let reduced = match aggregation.reducer {
        Reducer::Min => format!("min({input})"),
        Reducer::Max => format!("max({input})"),
        Reducer::Mean => format!("avg({input})"),
        Reducer::Sum => format!("sum({input})"),
        Reducer::Count => format!("CAST(count({input}) AS BIGINT)"),
        Reducer::Skew => format!(
            "CASE WHEN count({input}) < {MIN_SKEW_COUNT} THEN NULL ELSE skewness({input}) END"
        ),
    };

    format!("{reduced} AS {}", quote(&aggregation.name))
}

/// SELECT statement for one operation over the materialized table `current`.
/// Every statement carries the row id of its input so the final result can be
/// returned in input order.
fn step_sql(
    current: &str,
    input: &[String],
    output: &[String],
    operation: &Operation,
    right: Option<&str>,
) -> String {
    let row = quote(ROW_ID);
    let current = quote(current);

    match operation {
        Operation::Select(_) | Operation::Drop(_) => {
            format!("SELECT {row}, {} FROM {current}", column_list(output))
        }
        Operation::Filter(condition) => {
            format!("SELECT * FROM {current} WHERE {}", compile(condition))
        }
        Operation::WithColumns(definitions) => {
            let columns = output.iter().map(|name| {
                match definitions.iter().find(|(defined, _)| defined == name) {
                    Some((_, expr)) => format!("{} AS {}", compile(expr), quote(name)),
                    None => quote(name),
                }
            });

            format!("SELECT {row}, {} FROM {current}", columns.format(", "))
        }
        Operation::Aggregate { keys, aggregations } => {
            let keys = column_list(keys);

            format!(
                "SELECT {keys}, min({row}) AS {row}, {} FROM {current} GROUP BY {keys}",
                aggregations.iter().map(reduce).format(", ")
            )
        }
        Operation::LeftJoin { on, .. } => {
            let right = right.map(quote).unwrap_or_default();
            let left_columns = input.iter().map(|name| format!("l.{}", quote(name)));
            let right_columns = output[input.len()..]
                .iter()
                .map(|name| format!("r.{}", quote(name)));

            format!(
                "SELECT l.{row}, {} FROM {current} AS l LEFT JOIN {right} AS r ON l.{on} = r.{on}",
                left_columns.chain(right_columns).format(", "),
                on = quote(on)
            )
        }
    }
}

/// One materialized column, typed by the first non-null value and widened to
/// floats when integers and floats are mixed
enum Buffer {
    Nulls(usize),
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    fn read(value: ValueRef<'_>, column: &str) -> Result<Self, EngineError> {
        let cell = match value {
            ValueRef::Null => Cell::Null,
            ValueRef::Boolean(value) => Cell::Int(value as i64),
            ValueRef::TinyInt(value) => Cell::Int(value.into()),
            ValueRef::SmallInt(value) => Cell::Int(value.into()),
            ValueRef::Int(value) => Cell::Int(value.into()),
            ValueRef::BigInt(value) => Cell::Int(value),
            ValueRef::UTinyInt(value) => Cell::Int(value.into()),
            ValueRef::USmallInt(value) => Cell::Int(value.into()),
            ValueRef::UInt(value) => Cell::Int(value.into()),
            // integer sums come back as HUGEINT
            ValueRef::HugeInt(value) => match i64::try_from(value) {
                Ok(value) => Cell::Int(value),
                Err(_) => Cell::Float(value as f64),
            },
            ValueRef::UBigInt(value) => match i64::try_from(value) {
                Ok(value) => Cell::Int(value),
                Err(_) => Cell::Float(value as f64),
            },
            ValueRef::Float(value) => Cell::Float(value.into()),
            ValueRef::Double(value) => Cell::Float(value),
            ValueRef::Text(bytes) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
            other => {
                return Err(EngineError::UnsupportedType {
                    column: column.to_owned(),
                    kind: format!("{:?}", other.data_type()),
                })
            }
        };

        Ok(cell)
    }
}

impl Buffer {
    fn len(&self) -> usize {
        match self {
            Self::Nulls(length) => *length,
            Self::Int(values) => values.len(),
            Self::Float(values) => values.len(),
            Self::Text(values) => values.len(),
        }
    }

    fn push(&mut self, cell: Cell, column: &str) -> Result<(), EngineError> {
        let length = self.len();

        match (&mut *self, cell) {
            (Self::Nulls(length), Cell::Null) => *length += 1,
            (Self::Int(values), Cell::Null) => values.push(None),
            (Self::Float(values), Cell::Null) => values.push(None),
            (Self::Text(values), Cell::Null) => values.push(None),
            (Self::Int(values), Cell::Int(value)) => values.push(Some(value)),
            (Self::Float(values), Cell::Float(value)) => values.push(Some(value)),
            (Self::Float(values), Cell::Int(value)) => values.push(Some(value as f64)),
            (Self::Text(values), Cell::Text(value)) => values.push(Some(value)),
            (Self::Int(values), Cell::Float(value)) => {
                let mut widened: Vec<_> = values.iter().map(|v| v.map(|v| v as f64)).collect();
                widened.push(Some(value));
                *self = Self::Float(widened);
            }
            (Self::Nulls(_), Cell::Int(value)) => {
                let mut values = vec![None; length];
                values.push(Some(value));
                *self = Self::Int(values);
            }
            (Self::Nulls(_), Cell::Float(value)) => {
                let mut values = vec![None; length];
                values.push(Some(value));
                *self = Self::Float(values);
            }
            (Self::Nulls(_), Cell::Text(value)) => {
                let mut values = vec![None; length];
                values.push(Some(value));
                *self = Self::Text(values);
            }
            (_, _) => {
                return Err(EngineError::UnsupportedType {
                    column: column.to_owned(),
                    kind: "mixed text and numbers".to_owned(),
                })
            }
        }

        Ok(())
    }

    fn into_series(self, name: &str) -> Series {
        match self {
            Self::Nulls(length) => Series::new(name.into(), vec![None::<f64>; length]),
            Self::Int(values) => Series::new(name.into(), values),
            Self::Float(values) => Series::new(name.into(), values),
            Self::Text(values) => Series::new(name.into(), values),
        }
    }
}

/// Query engine backend on an embedded DuckDB database
pub struct DuckDbEngine {
    connection: Connection,
    create_new_table: bool,
    stages: usize,
}

impl DuckDbEngine {
    pub fn open(settings: &DatabaseSettings) -> Result<Self, EngineError> {
        let connection = if settings.path == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            if settings.delete_old_database {
                remove_database(Path::new(&settings.path))?;
            }
            Connection::open(&settings.path)?
        };

        if let Some(threads) = settings.threads {
            connection.execute_batch(&format!("SET threads = {threads}"))?;
        }
        if let Some(limit) = &settings.memory_limit {
            connection.execute_batch(&format!("SET memory_limit = {}", string_literal(limit)))?;
        }

        info!(database = %settings.path, "Opened DuckDB");

        Ok(Self {
            connection,
            create_new_table: settings.create_new_table,
            stages: 0,
        })
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>, EngineError> {
        let mut statement = self.connection.prepare(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_name = ? ORDER BY ordinal_position",
        )?;
        let columns = statement
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(EngineError::UnknownTable(table.to_owned()));
        }

        Ok(columns)
    }

    fn materialize(&mut self, query: &str) -> Result<String, EngineError> {
        let name = format!("__stage_{}", self.stages);
        self.stages += 1;

        debug!("{name}: {query}");
        self.connection
            .execute_batch(&format!("CREATE OR REPLACE TEMP TABLE {} AS {query}", quote(&name)))?;

        Ok(name)
    }

    /// Run all steps, returning the last materialized table and its columns
    fn run(
        &mut self,
        pipeline: &Pipeline,
        times: &mut Measurements,
    ) -> Result<(String, Vec<String>), EngineError> {
        let mut columns = self.table_columns(&pipeline.source)?;
        let mut current = self.materialize(&format!(
            "SELECT rowid AS {}, {} FROM {}",
            quote(ROW_ID),
            column_list(&columns),
            quote(&pipeline.source)
        ))?;

        for step in &pipeline.steps {
            let (right, right_columns) = match &step.operation {
                Operation::LeftJoin { right, .. } => {
                    let (table, columns) = self.run(right, times)?;
                    (Some(table), columns)
                }
                _ => (None, Vec::new()),
            };
            let output = step.operation.output_columns(&columns, &right_columns);
            let query = step_sql(&current, &columns, &output, &step.operation, right.as_deref());

            let start = Instant::now();
            current = self.materialize(&query)?;
            if let Some(stage) = step.stage {
                times.add(stage, start.elapsed());
            }

            columns = output;
        }

        Ok((current, columns))
    }

    fn fetch(&self, query: &str, names: &[String]) -> Result<DataFrame, EngineError> {
        let mut buffers: Vec<Buffer> = names.iter().map(|_| Buffer::Nulls(0)).collect();

        let mut statement = self.connection.prepare(query)?;
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            for (index, (buffer, name)) in buffers.iter_mut().zip(names).enumerate() {
                buffer.push(Cell::read(row.get_ref(index)?, name)?, name)?;
            }
        }

        let columns = buffers
            .into_iter()
            .zip(names)
            .map(|(buffer, name)| Column::from(buffer.into_series(name)))
            .collect();

        Ok(DataFrame::new(columns)?)
    }
}

fn remove_database(path: &Path) -> Result<(), EngineError> {
    let wal = path.with_extension(
        path.extension()
            .map(|extension| format!("{}.wal", extension.to_string_lossy()))
            .unwrap_or_else(|| "wal".to_owned()),
    );

    for file in [path, wal.as_path()] {
        match fs::remove_file(file) {
            Ok(()) => info!("Removed old database {}", file.display()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(EngineError::RemoveDatabase {
                    path: file.display().to_string(),
                    source,
                })
            }
        }
    }

    Ok(())
}

impl Engine for DuckDbEngine {
    fn label(&self) -> String {
        "DuckDB".to_owned()
    }

    #[instrument(skip(self, spec))]
    fn load_table(&mut self, name: &str, path: &Path, spec: &TableSpec) -> Result<(), EngineError> {
        if !self.create_new_table {
            info!("Skipping import, using existing table {name}");
            return Ok(());
        }

        let columns = spec
            .columns
            .iter()
            .map(|(column, kind)| format!("{}: {}", string_literal(column), string_literal(kind.sql())))
            .join(", ");

        self.connection.execute_batch(&format!(
            "CREATE OR REPLACE TABLE {} AS SELECT * FROM read_csv({}, header = {}, skip = {}, \
             auto_detect = false, columns = {{{columns}}})",
            quote(name),
            string_literal(&path.to_string_lossy()),
            spec.header,
            spec.skip_rows,
        ))?;

        let rows: i64 = self.connection.query_row(
            &format!("SELECT count(*) FROM {}", quote(name)),
            [],
            |row| row.get(0),
        )?;
        info!(rows, "Imported {name}");

        Ok(())
    }

    fn execute(
        &mut self,
        pipeline: &Pipeline,
        times: &mut Measurements,
    ) -> Result<DataFrame, EngineError> {
        let (table, columns) = self.run(pipeline, times)?;

        self.fetch(
            &format!(
                "SELECT {} FROM {} ORDER BY {}",
                column_list(&columns),
                quote(&table),
                quote(ROW_ID)
            ),
            &columns,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{col, count_over, int, when, ColumnType};
    use polars::prelude::DataType;
    use pretty_assertions::assert_eq;

    fn settings(path: &str) -> DatabaseSettings {
        DatabaseSettings {
            path: path.to_owned(),
            table: None,
            delete_old_database: true,
            create_new_table: true,
            threads: Some(2),
            memory_limit: None,
        }
    }

    fn lightcurves(dir: &Path) -> (std::path::PathBuf, TableSpec) {
        let path = dir.join("lightcurves.csv");
        fs::write(
            &path,
            "object_id,flux,band\n7,1.0,1\n3,2.0,\n7,3.0,1\n3,4.0,2\n7,8.0,9999999\n",
        )
        .unwrap();

        let spec = TableSpec::new([
            ("object_id", ColumnType::Int32),
            ("flux", ColumnType::Float64),
            ("band", ColumnType::Int64),
        ]);

        (path, spec)
    }

    fn f64s(frame: &DataFrame, name: &str) -> Vec<Option<f64>> {
        frame
            .column(name)
            .unwrap()
            .as_materialized_series()
            .cast(&DataType::Float64)
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect()
    }

    #[test]
    fn compiles_expressions() {
        let expr = when(
            count_over("var_0", "var_0").gt(int(1)),
            col("var_0"),
            Expr::Null,
        );

        assert_eq!(
            compile(&expr),
            r#"CASE WHEN (count("var_0") OVER (PARTITION BY "var_0") > 1) THEN "var_0" ELSE NULL END"#
        );
        assert_eq!(
            compile(&col("EDUC").fill_null(int(-1)).cast(ColumnType::Float64)),
            r#"CAST(coalesce("EDUC", -1) AS DOUBLE)"#
        );
        assert_eq!(compile(&col("a").distinct_from(int(3))), r#"("a" IS DISTINCT FROM 3)"#);
    }

    #[test]
    fn runs_pipeline_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let (path, spec) = lightcurves(dir.path());

        let mut engine = DuckDbEngine::open(&settings(IN_MEMORY)).unwrap();
        engine.load_table("lightcurves", &path, &spec).unwrap();

        let pipeline = Pipeline::scan("lightcurves")
            .filter(col("band").distinct_from(int(9999999)))
            .staged(
                "t_groupby_agg",
                Operation::Aggregate {
                    keys: vec!["object_id".to_owned()],
                    aggregations: vec![
                        Aggregation::of("flux", Reducer::Sum),
                        Aggregation::of("band", Reducer::Count),
                    ],
                },
            );

        let mut times = Measurements::new(["t_groupby_agg"]);
        let frame = engine.execute(&pipeline, &mut times).unwrap();

        assert_eq!(f64s(&frame, "object_id"), vec![Some(7.0), Some(3.0)]);
        assert_eq!(f64s(&frame, "flux_sum"), vec![Some(4.0), Some(6.0)]);
        assert_eq!(f64s(&frame, "band_count"), vec![Some(2.0), Some(1.0)]);
        assert_eq!(frame.column("band_count").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn left_join_keeps_unmatched_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (path, spec) = lightcurves(dir.path());
        let meta = dir.path().join("meta.csv");
        fs::write(&meta, "object_id,ddf\n3,1\n7,0\n11,1\n").unwrap();

        let mut engine = DuckDbEngine::open(&settings(IN_MEMORY)).unwrap();
        engine.load_table("lightcurves", &path, &spec).unwrap();
        engine
            .load_table(
                "meta",
                &meta,
                &TableSpec::new([("object_id", ColumnType::Int32), ("ddf", ColumnType::Int32)]),
            )
            .unwrap();

        let aggregates = Pipeline::scan("lightcurves").then(Operation::Aggregate {
            keys: vec!["object_id".to_owned()],
            aggregations: vec![Aggregation::of("flux", Reducer::Max)],
        });
        let pipeline = Pipeline::scan("meta").staged(
            "t_merge",
            Operation::LeftJoin {
                right: Box::new(aggregates),
                on: "object_id".to_owned(),
            },
        );

        let frame = engine.execute(&pipeline, &mut Measurements::default()).unwrap();

        assert_eq!(
            frame.get_column_names().iter().map(|name| name.as_str()).collect::<Vec<_>>(),
            vec!["object_id", "ddf", "flux_max"]
        );
        assert_eq!(f64s(&frame, "flux_max"), vec![Some(4.0), Some(8.0), None]);
    }

    #[test]
    fn skips_header_less_rows_and_reopens_without_import() {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join("bench.duckdb");
        let database = database.to_str().unwrap();
        let csv = dir.path().join("test_set.csv");
        fs::write(&csv, "1,0.5\n2,1.5\n3,2.5\n").unwrap();
        let spec = TableSpec::new([("object_id", ColumnType::Int32), ("flux", ColumnType::Float32)])
            .without_header(1);

        {
            let mut engine = DuckDbEngine::open(&settings(database)).unwrap();
            engine.load_table("test", &csv, &spec).unwrap();
        }

        let mut kept = settings(database);
        kept.delete_old_database = false;
        kept.create_new_table = false;
        let mut engine = DuckDbEngine::open(&kept).unwrap();
        engine.load_table("test", Path::new("/nonexistent.csv"), &spec).unwrap();

        let frame = engine
            .execute(&Pipeline::scan("test"), &mut Measurements::default())
            .unwrap();
        assert_eq!(f64s(&frame, "flux"), vec![Some(1.5), Some(2.5)]);

        drop(engine);
        let engine = DuckDbEngine::open(&settings(database)).unwrap();
        assert!(matches!(
            engine.table_columns("test"),
            Err(EngineError::UnknownTable(_))
        ));
    }

    #[test]
    fn nulls_only_column_becomes_float() {
        let mut buffer = Buffer::Nulls(0);
        buffer.push(Cell::Null, "x").unwrap();
        buffer.push(Cell::Int(2), "x").unwrap();
        buffer.push(Cell::Float(0.5), "x").unwrap();

        let series = buffer.into_series("x");
        assert_eq!(series.dtype(), &DataType::Float64);
        assert_eq!(
            series.f64().unwrap().into_iter().collect::<Vec<_>>(),
            vec![None, Some(2.0), Some(0.5)]
        );

        assert!(Buffer::Text(vec![]).push(Cell::Int(1), "y").is_err());
    }
}
