//! Backend neutral description of an ETL pipeline.
//!
//! Both engines execute the same `Pipeline`, so the dataset modules describe their
//! transformations once and the two backends stay logically equivalent.

use std::{
    fmt::{self, Display},
    ops,
};

/// Column types understood by both CSV readers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Int32 => "INTEGER",
            Self::Int64 => "BIGINT",
            Self::Float32 => "FLOAT",
            Self::Float64 => "DOUBLE",
            Self::Utf8 => "VARCHAR",
        }
    }
}

/// A CSV source: column names and types in file order
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub columns: Vec<(String, ColumnType)>,
    /// the first line after `skip_rows` holds column names
    pub header: bool,
    pub skip_rows: usize,
}

impl TableSpec {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = (S, ColumnType)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, kind)| (name.into(), kind))
                .collect(),
            header: true,
            skip_rows: 0,
        }
    }

    pub fn without_header(mut self, skip_rows: usize) -> Self {
        self.header = false;
        self.skip_rows = skip_rows;
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Gt,
    And,
}

impl BinaryOp {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Gt => ">",
            Self::And => "AND",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Int(i64),
    Float(f64),
    Null,
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// inequality where null is an ordinary value
    DistinctFrom(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, f64),
    IsNotNull(Box<Expr>),
    FillNull(Box<Expr>, Box<Expr>),
    Cast(Box<Expr>, ColumnType),
    When {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// number of non-null values of `column` within each `partition` group
    CountOver { column: String, partition: String },
}

pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

pub fn int(value: i64) -> Expr {
    Expr::Int(value)
}

pub fn float(value: f64) -> Expr {
    Expr::Float(value)
}

pub fn when(condition: Expr, then: Expr, otherwise: Expr) -> Expr {
    Expr::When {
        condition: Box::new(condition),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    }
}

pub fn count_over(column: impl Into<String>, partition: impl Into<String>) -> Expr {
    Expr::CountOver {
        column: column.into(),
        partition: partition.into(),
    }
}

impl Expr {
    fn binary(self, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn equal(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn not_equal(self, right: Expr) -> Expr {
        self.binary(BinaryOp::NotEq, right)
    }

    pub fn gt(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn and(self, right: Expr) -> Expr {
        self.binary(BinaryOp::And, right)
    }

    pub fn distinct_from(self, right: Expr) -> Expr {
        Expr::DistinctFrom(Box::new(self), Box::new(right))
    }

    pub fn pow(self, exponent: f64) -> Expr {
        Expr::Pow(Box::new(self), exponent)
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNotNull(Box::new(self))
    }

    pub fn fill_null(self, value: Expr) -> Expr {
        Expr::FillNull(Box::new(self), Box::new(value))
    }

    pub fn cast(self, kind: ColumnType) -> Expr {
        Expr::Cast(Box::new(self), kind)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl ops::$trait for Expr {
            type Output = Expr;

            fn $method(self, right: Expr) -> Expr {
                self.binary($op, right)
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);

/// Groups with fewer non-null values reduce to a null skew
pub const MIN_SKEW_COUNT: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Min,
    Max,
    Mean,
    Sum,
    Count,
    /// bias corrected sample skewness, null below `MIN_SKEW_COUNT` values
    Skew,
}

impl Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Skew => "skew",
        };

        f.write_str(name)
    }
}

/// `reducer(input) AS name`
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub name: String,
    pub reducer: Reducer,
    pub input: Expr,
}

impl Aggregation {
    /// named `<column>_<reducer>`
    pub fn of(column: &str, reducer: Reducer) -> Self {
        Self {
            name: format!("{column}_{reducer}"),
            reducer,
            input: col(column),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Select(Vec<String>),
    Filter(Expr),
    /// new columns are appended, existing ones replaced in place
    WithColumns(Vec<(String, Expr)>),
    /// one row per distinct key, in order of first appearance
    Aggregate {
        keys: Vec<String>,
        aggregations: Vec<Aggregation>,
    },
    Drop(Vec<String>),
    /// left join on `on`, the key column of `right` is not repeated
    LeftJoin { right: Box<Pipeline>, on: String },
}

/// An operation and the timing stage it is charged to
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub operation: Operation,
    pub stage: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub source: String,
    pub steps: Vec<Step>,
}

impl Pipeline {
    pub fn scan(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            steps: Vec::new(),
        }
    }

    pub fn then(mut self, operation: Operation) -> Self {
        self.steps.push(Step {
            operation,
            stage: None,
        });
        self
    }

    pub fn staged(mut self, stage: &'static str, operation: Operation) -> Self {
        self.steps.push(Step {
            operation,
            stage: Some(stage),
        });
        self
    }

    pub fn select<S: Into<String>>(self, columns: impl IntoIterator<Item = S>) -> Self {
        self.then(Operation::Select(
            columns.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn filter(self, condition: Expr) -> Self {
        self.then(Operation::Filter(condition))
    }
}

impl Operation {
    /// Output column names given the input columns (and those of a join's right side)
    pub fn output_columns(&self, input: &[String], right: &[String]) -> Vec<String> {
        match self {
            Self::Select(columns) => columns.clone(),
            Self::Filter(_) => input.to_vec(),
            Self::WithColumns(columns) => {
                let mut output = input.to_vec();

                for (name, _) in columns {
                    if !output.contains(name) {
                        output.push(name.clone());
                    }
                }

                output
            }
            Self::Aggregate { keys, aggregations } => keys
                .iter()
                .cloned()
                .chain(aggregations.iter().map(|aggregation| aggregation.name.clone()))
                .collect(),
            Self::Drop(columns) => input
                .iter()
                .filter(|name| !columns.contains(name))
                .cloned()
                .collect(),
            Self::LeftJoin { on, .. } => input
                .iter()
                .chain(right.iter().filter(|name| *name != on))
                .cloned()
                .collect(),
        }
    }
}
