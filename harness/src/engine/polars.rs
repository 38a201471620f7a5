use super::{Engine, EngineError};
use crate::{
    backend::{DataFrameMode, ExecutionContext},
    pipeline::{self, Aggregation, BinaryOp, ColumnType, Operation, Pipeline, Reducer, TableSpec},
    timer::Measurements,
};
use polars::prelude::*;
use std::{collections::HashMap, path::Path, sync::Arc, time::Instant};
use tracing::{debug, info, instrument};

pub fn dtype(kind: ColumnType) -> DataType {
    match kind {
        ColumnType::Int32 => DataType::Int32,
        ColumnType::Int64 => DataType::Int64,
        ColumnType::Float32 => DataType::Float32,
        ColumnType::Float64 => DataType::Float64,
        ColumnType::Utf8 => DataType::String,
    }
}

pub fn read_csv(path: &Path, spec: &TableSpec) -> Result<DataFrame, EngineError> {
    let mut schema = Schema::with_capacity(spec.columns.len());
    for (name, kind) in &spec.columns {
        schema.with_column(name.as_str().into(), dtype(*kind));
    }

    // gzip compressed files are decompressed by the reader
    let frame = CsvReadOptions::default()
        .with_has_header(spec.header)
        .with_skip_rows(spec.skip_rows)
        .with_schema(Some(Arc::new(schema)))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    Ok(frame)
}

fn compile(expr: &pipeline::Expr) -> Expr {
    use pipeline::Expr as E;

    match expr {
        E::Column(name) => col(name.as_str()),
        E::Int(value) => lit(*value),
        E::Float(value) => lit(*value),
        E::Null => lit(Null {}),
        E::Binary { op, left, right } => {
            let (left, right) = (compile(left), compile(right));

            match op {
                BinaryOp::Add => left + right,
                BinaryOp::Sub => left - right,
                BinaryOp::Mul => left * right,
                BinaryOp::Div => left / right,
                BinaryOp::Eq => left.eq(right),
                BinaryOp::NotEq => left.neq(right),
                BinaryOp::Gt => left.gt(right),
                BinaryOp::And => left.and(right),
            }
        }
        E::DistinctFrom(left, right) => compile(left).neq_missing(compile(right)),
        E::Pow(base, exponent) => compile(base).pow(lit(*exponent)),
        E::IsNotNull(inner) => compile(inner).is_not_null(),
        E::FillNull(inner, value) => compile(inner).fill_null(compile(value)),
        E::Cast(inner, kind) => compile(inner).cast(dtype(*kind)),
        E::When {
            condition,
            then,
            otherwise,
        } => when(compile(condition))
            .then(compile(then))
            .otherwise(compile(otherwise)),
        E::CountOver { column, partition } => col(column.as_str())
            .count()
            .over([col(partition.as_str())]),
    }
}

fn reduce(aggregation: &Aggregation) -> Expr {
    let input = compile(&aggregation.input);

    let reduced = match aggregation.reducer {
        Reducer::Min => input.min(),
        Reducer::Max => input.max(),
        Reducer::Mean => input.mean(),
        Reducer::Sum => input.sum(),
        Reducer::Count => input.count().cast(DataType::Int64),
        Reducer::Skew => when(input.clone().count().lt(lit(pipeline::MIN_SKEW_COUNT)))
            .then(lit(Null {}))
            .otherwise(input.skew(false)),
    };

    reduced.alias(aggregation.name.as_str())
}

const ROW_INDEX: &str = "__row";

fn columns(names: &[String]) -> Vec<Expr> {
    names.iter().map(|name| col(name.as_str())).collect()
}

fn column_names(frame: &DataFrame) -> Vec<String> {
    frame
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

/// Add one operation to a lazy plan, `join_side` resolves the right side of a join
fn apply<F>(
    frame: LazyFrame,
    input: &[String],
    operation: &Operation,
    join_side: F,
) -> Result<(LazyFrame, Vec<String>), EngineError>
where
    F: FnOnce(&Pipeline) -> Result<(LazyFrame, Vec<String>), EngineError>,
{
    let (right, right_columns) = match operation {
        Operation::LeftJoin { right, .. } => {
            let (frame, columns) = join_side(right)?;
            (Some(frame), columns)
        }
        _ => (None, Vec::new()),
    };
    let output = operation.output_columns(input, &right_columns);

    let frame = match (operation, right) {
        (Operation::Select(names), _) => frame.select(columns(names)),
        (Operation::Filter(condition), _) => frame.filter(compile(condition)),
        (Operation::WithColumns(definitions), _) => frame.with_columns(
            definitions
                .iter()
                .map(|(name, expr)| compile(expr).alias(name.as_str()))
                .collect::<Vec<_>>(),
        ),
        (Operation::Aggregate { keys, aggregations }, _) => frame
            .group_by_stable(columns(keys))
            .agg(aggregations.iter().map(reduce).collect::<Vec<_>>()),
        (Operation::Drop(_), _) => frame.select(columns(&output)),
        // the row index pins the result to the order of the left side
        (Operation::LeftJoin { on, .. }, Some(right)) => frame
            .with_row_index(ROW_INDEX, None)
            .join(
                right,
                [col(on.as_str())],
                [col(on.as_str())],
                JoinArgs::new(JoinType::Left),
            )
            .sort_by_exprs([col(ROW_INDEX)], SortMultipleOptions::default())
            .select(columns(&output)),
        (Operation::LeftJoin { right, .. }, None) => {
            return Err(EngineError::UnknownTable(right.source.clone()))
        }
    };

    Ok((frame, output))
}

/// Dataframe backend running pipelines on polars according to the bound mode
pub struct PolarsEngine {
    context: ExecutionContext,
    tables: HashMap<String, DataFrame>,
}

impl PolarsEngine {
    pub fn new(context: ExecutionContext) -> Self {
        Self {
            context,
            tables: HashMap::new(),
        }
    }

    pub fn insert_table(&mut self, name: &str, frame: DataFrame) {
        self.tables.insert(name.to_owned(), frame);
    }

    fn table(&self, name: &str) -> Result<&DataFrame, EngineError> {
        self.tables
            .get(name)
            .ok_or_else(|| EngineError::UnknownTable(name.to_owned()))
    }

    /// materialize after every step and charge each step to its stage
    fn run_eager(
        &self,
        pipeline: &Pipeline,
        times: &mut Measurements,
    ) -> Result<(DataFrame, Vec<String>), EngineError> {
        let mut frame = self.table(&pipeline.source)?.clone();
        let mut names = column_names(&frame);

        for step in &pipeline.steps {
            let mut join_times = Measurements::default();
            let start = Instant::now();

            let (plan, output) = apply(frame.lazy(), &names, &step.operation, |right| {
                let (frame, names) = self.run_eager(right, &mut join_times)?;
                Ok((frame.lazy(), names))
            })?;
            frame = plan.collect()?;
            let elapsed = start.elapsed();

            // the right side was timed on its own, only the join itself counts here
            let mut own = elapsed.as_secs_f64();
            for (stage, seconds) in join_times.iter() {
                times.add_secs(stage, seconds);
                own -= seconds;
            }
            if let Some(stage) = step.stage {
                times.add_secs(stage, own.max(0.0));
            }

            names = output;
        }

        Ok((frame, names))
    }

    fn plan(&self, pipeline: &Pipeline) -> Result<(LazyFrame, Vec<String>), EngineError> {
        let source = self.table(&pipeline.source)?;
        let mut names = column_names(source);
        let mut frame = source.clone().lazy();

        for step in &pipeline.steps {
            let (next, output) = apply(frame, &names, &step.operation, |right| self.plan(right))?;
            frame = next;
            names = output;
        }

        Ok((frame, names))
    }
}

impl Engine for PolarsEngine {
    fn label(&self) -> String {
        self.context.label()
    }

    #[instrument(skip(self, spec), fields(mode = %self.context.mode))]
    fn load_table(&mut self, name: &str, path: &Path, spec: &TableSpec) -> Result<(), EngineError> {
        let frame = read_csv(path, spec)?;
        info!(rows = frame.height(), columns = frame.width(), "Loaded {name}");

        self.tables.insert(name.to_owned(), frame);

        Ok(())
    }

    fn execute(
        &mut self,
        pipeline: &Pipeline,
        times: &mut Measurements,
    ) -> Result<DataFrame, EngineError> {
        debug!(source = %pipeline.source, steps = pipeline.steps.len(), "Executing pipeline");

        match self.context.mode {
            DataFrameMode::Eager => Ok(self.run_eager(pipeline, times)?.0),
            DataFrameMode::Lazy => Ok(self.plan(pipeline)?.0.collect()?),
            DataFrameMode::Streaming => Ok(self.plan(pipeline)?.0.with_streaming(true).collect()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{col as column, count_over, float, int, when as case};
    use pretty_assertions::assert_eq;

    fn engine(mode: DataFrameMode) -> PolarsEngine {
        let mut engine = PolarsEngine::new(ExecutionContext::new(mode, None, None));

        engine.insert_table(
            "lightcurves",
            df!(
                "object_id" => [7i32, 3, 7, 3, 7],
                "flux" => [1.0f64, 2.0, 3.0, 4.0, 8.0],
                "band" => [Some(1i64), None, Some(1), Some(2), Some(9999999)]
            )
            .unwrap(),
        );
        engine.insert_table(
            "meta",
            df!(
                "object_id" => [3i32, 7, 11],
                "ddf" => [1i32, 0, 1]
            )
            .unwrap(),
        );

        engine
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
    fn distinct_from_keeps_nulls() {
        let pipeline = Pipeline::scan("lightcurves")
            .filter(column("band").distinct_from(int(9999999)))
            .select(["band"]);

        let frame = engine(DataFrameMode::Eager)
            .execute(&pipeline, &mut Measurements::default())
            .unwrap();

        assert_eq!(f64s(&frame, "band"), vec![Some(1.0), None, Some(1.0), Some(2.0)]);
    }

    #[test]
    fn aggregate_keeps_first_appearance_order_and_joins() {
        let aggregates = Pipeline::scan("lightcurves").staged(
            "t_groupby_agg",
            Operation::Aggregate {
                keys: vec!["object_id".to_owned()],
                aggregations: vec![
                    Aggregation::of("flux", Reducer::Max),
                    Aggregation::of("flux", Reducer::Count),
                ],
            },
        );
        let pipeline = Pipeline::scan("meta").staged(
            "t_merge",
            Operation::LeftJoin {
                right: Box::new(aggregates.clone()),
                on: "object_id".to_owned(),
            },
        );

        for mode in [DataFrameMode::Eager, DataFrameMode::Lazy] {
            let mut engine = engine(mode);
            let grouped = engine
                .execute(&aggregates, &mut Measurements::default())
                .unwrap();
            assert_eq!(f64s(&grouped, "object_id"), vec![Some(7.0), Some(3.0)]);

            let mut times = Measurements::new(["t_groupby_agg", "t_merge"]);
            let joined = engine.execute(&pipeline, &mut times).unwrap();

            assert_eq!(
                column_names(&joined),
                vec!["object_id", "ddf", "flux_max", "flux_count"]
            );
            assert_eq!(
                f64s(&joined, "flux_max"),
                vec![Some(4.0), Some(8.0), None]
            );
        }
    }

    #[test]
    fn windowed_count_and_conditional_null() {
        let pipeline = Pipeline::scan("lightcurves")
            .then(Operation::WithColumns(vec![(
                "object_id_count".to_owned(),
                count_over("object_id", "object_id"),
            )]))
            .then(Operation::WithColumns(vec![(
                "flux_gt1".to_owned(),
                case(
                    column("object_id_count").gt(int(2)),
                    column("flux"),
                    pipeline::Expr::Null,
                ),
            )]))
            .then(Operation::Drop(vec!["band".to_owned()]));

        let frame = engine(DataFrameMode::Lazy)
            .execute(&pipeline, &mut Measurements::default())
            .unwrap();

        assert_eq!(
            column_names(&frame),
            vec!["object_id", "flux", "object_id_count", "flux_gt1"]
        );
        assert_eq!(
            f64s(&frame, "object_id_count"),
            vec![Some(3.0), Some(2.0), Some(3.0), Some(2.0), Some(3.0)]
        );
        assert_eq!(
            f64s(&frame, "flux_gt1"),
            vec![Some(1.0), None, Some(3.0), None, Some(8.0)]
        );
    }

    #[test]
    fn fill_and_cast_replace_in_place() {
        let pipeline = Pipeline::scan("lightcurves").then(Operation::WithColumns(vec![(
            "band".to_owned(),
            column("band")
                .fill_null(int(-1))
                .cast(ColumnType::Float64)
                * float(0.5),
        )]));

        let frame = engine(DataFrameMode::Eager)
            .execute(&pipeline, &mut Measurements::default())
            .unwrap();

        assert_eq!(column_names(&frame), vec!["object_id", "flux", "band"]);
        assert_eq!(frame.column("band").unwrap().dtype(), &DataType::Float64);
        assert_eq!(
            f64s(&frame, "band"),
            vec![Some(0.5), Some(-0.5), Some(0.5), Some(1.0), Some(4999999.5)]
        );
    }

    #[test]
    fn reads_csv_with_schema_and_skipped_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_set.csv");
        std::fs::write(&path, "object_id,flux\n1,0.5\n2,1.5\n3,2.5\n").unwrap();

        let spec = TableSpec::new([("object_id", ColumnType::Int32), ("flux", ColumnType::Float32)])
            .without_header(2);
        let frame = read_csv(&path, &spec).unwrap();

        assert_eq!(frame.height(), 2);
        assert_eq!(frame.column("object_id").unwrap().dtype(), &DataType::Int32);
        assert_eq!(f64s(&frame, "flux"), vec![Some(1.5), Some(2.5)]);
    }
}
