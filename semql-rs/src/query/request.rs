//! Query request types: the raw request as submitted and its validated form

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{DataType, FieldRef, FilterOp, Grain, Operand};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

/// A filter as submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFilter {
    pub field: String,
    #[serde(alias = "operator")]
    pub op: FilterOp,
    #[serde(default, alias = "values")]
    pub value: Value,
    /// Apply to the aggregated value (HAVING) instead of the rows
    #[serde(default)]
    pub post_aggregate: bool,
}

impl RawFilter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
            post_aggregate: false,
        }
    }

    pub fn post_aggregate(mut self) -> Self {
        self.post_aggregate = true;
        self
    }
}

/// An order-by entry: `"field"`, `"field desc"`, or `{field, direction}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawOrderBy {
    Spec {
        field: String,
        #[serde(default)]
        direction: SortDirection,
    },
    Text(String),
}

impl RawOrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        RawOrderBy::Spec {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        RawOrderBy::Spec {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Field and direction of this entry
    pub fn parts(&self) -> (&str, SortDirection) {
        match self {
            RawOrderBy::Spec { field, direction } => (field, *direction),
            RawOrderBy::Text(text) => {
                let text = text.trim();
                match text.rsplit_once(char::is_whitespace) {
                    Some((field, dir)) if dir.eq_ignore_ascii_case("desc") => {
                        (field.trim_end(), SortDirection::Desc)
                    }
                    Some((field, dir)) if dir.eq_ignore_ascii_case("asc") => {
                        (field.trim_end(), SortDirection::Asc)
                    }
                    _ => (text, SortDirection::Asc),
                }
            }
        }
    }
}

/// A semantic query as submitted by a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticQuery {
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub filters: Vec<RawFilter>,
    #[serde(default)]
    pub order_by: Vec<RawOrderBy>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl SemanticQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics<S: Into<String>>(mut self, metrics: impl IntoIterator<Item = S>) -> Self {
        self.metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dimensions<S: Into<String>>(
        mut self,
        dimensions: impl IntoIterator<Item = S>,
    ) -> Self {
        self.dimensions = dimensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: RawFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_order_by(mut self, order_by: RawOrderBy) -> Self {
        self.order_by.push(order_by);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A selected dimension
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedDimension {
    pub field: FieldRef,
    pub grain: Option<Grain>,
    pub alias: String,
    pub data_type: DataType,
}

/// A selected metric
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedMetric {
    pub field: FieldRef,
    pub alias: String,
}

/// What a filter constrains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTarget {
    Dimension(DataType),
    Metric,
}

/// A type-checked filter
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: FieldRef,
    pub grain: Option<Grain>,
    pub target: FilterTarget,
    pub op: FilterOp,
    pub operand: Operand,
    pub post_aggregate: bool,
}

/// A resolved order-by entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Output alias of the selected column
    pub alias: String,
    pub direction: SortDirection,
}

/// A validated query, ready for join resolution
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub base_table: String,
    pub dimensions: Vec<SelectedDimension>,
    pub metrics: Vec<SelectedMetric>,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    /// Every table the query touches: dimensions, aggregated metric
    /// tables, and filter tables
    pub required_tables: BTreeSet<String>,
}
