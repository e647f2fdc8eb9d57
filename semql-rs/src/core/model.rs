//! Core semantic layer types: Table, Dimension, Metric, Relationship

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::{FilterOp, Operand};

/// Declared type of a dimension (and of an output column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Date,
    Timestamp,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Truncation granularity for date/timestamp dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grain {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Grain {
    pub const ALL: [Grain; 5] = [
        Grain::Day,
        Grain::Week,
        Grain::Month,
        Grain::Quarter,
        Grain::Year,
    ];

    /// Parse a grain name, case-insensitively (`month`, `MONTH`)
    pub fn parse(name: &str) -> Option<Grain> {
        Grain::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grain::Day => "day",
            Grain::Week => "week",
            Grain::Month => "month",
            Grain::Quarter => "quarter",
            Grain::Year => "year",
        }
    }

    /// Date part keyword used by the truncation functions
    pub fn as_sql(&self) -> &'static str {
        match self {
            Grain::Day => "DAY",
            Grain::Week => "WEEK",
            Grain::Month => "MONTH",
            Grain::Quarter => "QUARTER",
            Grain::Year => "YEAR",
        }
    }
}

impl fmt::Display for Grain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical table the model reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    /// Physical source reference (`dataset.table` or `project.dataset.table`)
    pub source: String,
    pub primary_key: Vec<String>,
}

impl Table {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            primary_key: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key.push(column.into());
        self
    }
}

/// Dimension type; temporal variants carry the grains they support
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimensionType {
    String,
    Number,
    Boolean,
    Date { grains: BTreeSet<Grain> },
    Timestamp { grains: BTreeSet<Grain> },
}

impl DimensionType {
    pub fn data_type(&self) -> DataType {
        match self {
            DimensionType::String => DataType::String,
            DimensionType::Number => DataType::Number,
            DimensionType::Boolean => DataType::Boolean,
            DimensionType::Date { .. } => DataType::Date,
            DimensionType::Timestamp { .. } => DataType::Timestamp,
        }
    }

    /// Supported grains; `None` for non-temporal dimensions
    pub fn grains(&self) -> Option<&BTreeSet<Grain>> {
        match self {
            DimensionType::Date { grains } | DimensionType::Timestamp { grains } => Some(grains),
            _ => None,
        }
    }
}

/// A dimension represents a grouping attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub table: String,
    pub name: String,
    /// Column name or derived SQL expression (may use `{table}`)
    pub expr: String,
    pub r#type: DimensionType,
}

impl Dimension {
    pub fn new(table: impl Into<String>, name: impl Into<String>, r#type: DimensionType) -> Self {
        let name = name.into();
        Self {
            table: table.into(),
            expr: name.clone(),
            name,
            r#type,
        }
    }

    pub fn string(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(table, name, DimensionType::String)
    }

    pub fn number(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(table, name, DimensionType::Number)
    }

    pub fn boolean(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(table, name, DimensionType::Boolean)
    }

    pub fn date(
        table: impl Into<String>,
        name: impl Into<String>,
        grains: impl IntoIterator<Item = Grain>,
    ) -> Self {
        Self::new(
            table,
            name,
            DimensionType::Date {
                grains: grains.into_iter().collect(),
            },
        )
    }

    pub fn timestamp(
        table: impl Into<String>,
        name: impl Into<String>,
        grains: impl IntoIterator<Item = Grain>,
    ) -> Self {
        Self::new(
            table,
            name,
            DimensionType::Timestamp {
                grains: grains.into_iter().collect(),
            },
        )
    }

    pub fn with_expr(mut self, expr: impl Into<String>) -> Self {
        self.expr = expr.into();
        self
    }

    pub fn data_type(&self) -> DataType {
        self.r#type.data_type()
    }

    pub fn reference(&self) -> FieldRef {
        FieldRef::new(&self.table, &self.name)
    }
}

/// Aggregation function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Count,
    CountDistinct,
    Avg,
    Min,
    Max,
}

impl Aggregation {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Aggregation::Sum => "SUM",
            Aggregation::Count => "COUNT",
            Aggregation::CountDistinct => "COUNT_DISTINCT",
            Aggregation::Avg => "AVG",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
        }
    }
}

/// What a ratio evaluates to when its denominator is zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroPolicy {
    #[default]
    Null,
    Zero,
    Error,
}

impl ZeroPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZeroPolicy::Null => "null",
            ZeroPolicy::Zero => "zero",
            ZeroPolicy::Error => "error",
        }
    }
}

/// Row filter baked into a metric definition (e.g. `status = 'completed'`)
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFilter {
    /// Dimension of the metric's own table
    pub field: String,
    pub op: FilterOp,
    pub operand: Operand,
}

/// Direct aggregation or ratio of two metrics
#[derive(Debug, Clone, PartialEq)]
pub enum MetricKind {
    Aggregate {
        agg: Aggregation,
        /// Column, derived expression, or `*` (COUNT only)
        expr: String,
        filters: Vec<MetricFilter>,
    },
    Ratio {
        numerator: FieldRef,
        denominator: FieldRef,
        on_zero: ZeroPolicy,
    },
}

/// A metric represents a business measure
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub table: String,
    pub name: String,
    pub kind: MetricKind,
}

impl Metric {
    pub fn aggregate(
        table: impl Into<String>,
        name: impl Into<String>,
        agg: Aggregation,
        expr: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            kind: MetricKind::Aggregate {
                agg,
                expr: expr.into(),
                filters: Vec::new(),
            },
        }
    }

    pub fn sum(table: impl Into<String>, name: impl Into<String>, expr: impl Into<String>) -> Self {
        Self::aggregate(table, name, Aggregation::Sum, expr)
    }

    pub fn count(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::aggregate(table, name, Aggregation::Count, "*")
    }

    pub fn count_distinct(
        table: impl Into<String>,
        name: impl Into<String>,
        expr: impl Into<String>,
    ) -> Self {
        Self::aggregate(table, name, Aggregation::CountDistinct, expr)
    }

    pub fn avg(table: impl Into<String>, name: impl Into<String>, expr: impl Into<String>) -> Self {
        Self::aggregate(table, name, Aggregation::Avg, expr)
    }

    pub fn min(table: impl Into<String>, name: impl Into<String>, expr: impl Into<String>) -> Self {
        Self::aggregate(table, name, Aggregation::Min, expr)
    }

    pub fn max(table: impl Into<String>, name: impl Into<String>, expr: impl Into<String>) -> Self {
        Self::aggregate(table, name, Aggregation::Max, expr)
    }

    /// Ratio of two metrics; unqualified inputs resolve against `table`
    pub fn ratio(
        table: impl Into<String>,
        name: impl Into<String>,
        numerator: &str,
        denominator: &str,
    ) -> Self {
        let table = table.into();
        Self {
            kind: MetricKind::Ratio {
                numerator: FieldRef::qualify(numerator, &table),
                denominator: FieldRef::qualify(denominator, &table),
                on_zero: ZeroPolicy::Null,
            },
            table,
            name: name.into(),
        }
    }

    pub fn with_filter(mut self, field: impl Into<String>, op: FilterOp, operand: Operand) -> Self {
        if let MetricKind::Aggregate { filters, .. } = &mut self.kind {
            filters.push(MetricFilter {
                field: field.into(),
                op,
                operand,
            });
        }
        self
    }

    pub fn with_zero_policy(mut self, policy: ZeroPolicy) -> Self {
        if let MetricKind::Ratio { on_zero, .. } = &mut self.kind {
            *on_zero = policy;
        }
        self
    }

    pub fn reference(&self) -> FieldRef {
        FieldRef::new(&self.table, &self.name)
    }
}

/// Relationship cardinality, read left to right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl Cardinality {
    fn from_sides(left_many: bool, right_many: bool) -> Self {
        match (left_many, right_many) {
            (false, false) => Cardinality::OneToOne,
            (false, true) => Cardinality::OneToMany,
            (true, false) => Cardinality::ManyToOne,
            (true, true) => Cardinality::ManyToMany,
        }
    }

    fn left_many(&self) -> bool {
        matches!(self, Cardinality::ManyToOne | Cardinality::ManyToMany)
    }

    fn right_many(&self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }

    /// Cardinality of the same relationship read right to left
    pub fn reverse(&self) -> Self {
        Self::from_sides(self.right_many(), self.left_many())
    }

    /// Cardinality of `self` followed by `next`
    pub fn compose(&self, next: Cardinality) -> Self {
        Self::from_sides(
            self.left_many() || next.left_many(),
            self.right_many() || next.right_many(),
        )
    }

    /// Whether one left row can match several right rows
    pub fn fans_out(&self) -> bool {
        self.right_many()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::OneToOne => "one_to_one",
            Cardinality::OneToMany => "one_to_many",
            Cardinality::ManyToOne => "many_to_one",
            Cardinality::ManyToMany => "many_to_many",
        }
    }
}

/// SQL join kind of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    #[default]
    Left,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// A relationship defines how two tables join together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub left_table: String,
    pub right_table: String,
    /// Ordered `(left_column, right_column)` equality pairs
    pub keys: Vec<(String, String)>,
    pub cardinality: Cardinality,
    pub join_kind: JoinKind,
}

impl Relationship {
    pub fn new(
        left_table: impl Into<String>,
        right_table: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            left_table: left_table.into(),
            right_table: right_table.into(),
            keys: Vec::new(),
            cardinality,
            join_kind: JoinKind::Left,
        }
    }

    pub fn one_to_one(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::new(left, right, Cardinality::OneToOne)
    }

    pub fn one_to_many(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::new(left, right, Cardinality::OneToMany)
    }

    pub fn many_to_one(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::new(left, right, Cardinality::ManyToOne)
    }

    pub fn many_to_many(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::new(left, right, Cardinality::ManyToMany)
    }

    pub fn on(mut self, left_column: impl Into<String>, right_column: impl Into<String>) -> Self {
        self.keys.push((left_column.into(), right_column.into()));
        self
    }

    pub fn with_join_kind(mut self, join_kind: JoinKind) -> Self {
        self.join_kind = join_kind;
        self
    }
}

/// A `table.field` reference
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldRef {
    pub table: String,
    pub field: String,
}

impl FieldRef {
    pub fn new(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
        }
    }

    /// Parse `table.field`, falling back to `default_table` for a bare name
    pub fn qualify(reference: &str, default_table: &str) -> Self {
        match reference.split_once('.') {
            Some((table, field)) => Self::new(table, field),
            None => Self::new(default_table, reference),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.field)
    }
}
