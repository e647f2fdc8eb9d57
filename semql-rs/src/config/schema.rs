//! Serde types for model documents
//!
//! A model document is YAML (or JSON, which `serde_yaml` also reads):
//!
//! ```yaml
//! tables:
//!   - name: orders
//!     source: shop.orders
//!     primary_key: id
//! dimensions:
//!   - table: orders
//!     name: created_at
//!     type: timestamp
//!     grains: [day, month]
//! metrics:
//!   - table: orders
//!     name: revenue
//!     agg: sum
//!     expr: amount
//!   - table: orders
//!     name: aov
//!     ratio_of: [revenue, order_count]
//! relationships:
//!   - left_table: orders
//!     right_table: customers
//!     on: [[customer_id, id]]
//!     cardinality: many_to_one
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{
    Aggregation, Cardinality, DataType, FilterOp, Grain, JoinKind, ZeroPolicy,
    DEFAULT_MAX_FRONTIER,
};

/// Knobs that apply to every compilation against a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Cap on tables discovered per level of the join search
    pub max_join_frontier: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_join_frontier: DEFAULT_MAX_FRONTIER,
        }
    }
}

/// One model document; several documents concatenate section by section
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub tables: Vec<TableConfig>,
    #[serde(default)]
    pub dimensions: Vec<DimensionConfig>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
    #[serde(default)]
    pub options: Option<CompileOptions>,
}

impl ModelConfig {
    /// Append another document's sections; its options win when present
    pub fn merge(&mut self, other: ModelConfig) {
        self.tables.extend(other.tables);
        self.dimensions.extend(other.dimensions);
        self.metrics.extend(other.metrics);
        self.relationships.extend(other.relationships);
        if other.options.is_some() {
            self.options = other.options;
        }
    }
}

/// `primary_key: id` or `primary_key: [tenant_id, id]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum KeyColumns {
    One(String),
    Many(Vec<String>),
}

impl KeyColumns {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            KeyColumns::One(column) => vec![column],
            KeyColumns::Many(columns) => columns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableConfig {
    pub name: String,
    #[serde(alias = "source_ref", alias = "table")]
    pub source: String,
    #[serde(default)]
    pub primary_key: Option<KeyColumns>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DimensionConfig {
    pub table: String,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Defaults to the dimension name
    #[serde(default, alias = "sql")]
    pub expr: Option<String>,
    /// Temporal dimensions only; every grain when omitted
    #[serde(default)]
    pub grains: Option<Vec<Grain>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricFilterConfig {
    pub field: String,
    #[serde(alias = "operator")]
    pub op: FilterOp,
    #[serde(default, alias = "values")]
    pub value: Value,
}

/// An aggregate (`agg` + `expr`) or a ratio (`ratio_of` or
/// `numerator`/`denominator`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricConfig {
    pub table: String,
    pub name: String,
    #[serde(default, alias = "agg_type")]
    pub agg: Option<Aggregation>,
    #[serde(default, alias = "sql")]
    pub expr: Option<String>,
    #[serde(default)]
    pub filters: Vec<MetricFilterConfig>,
    #[serde(default)]
    pub ratio_of: Option<Vec<String>>,
    #[serde(default)]
    pub numerator: Option<String>,
    #[serde(default)]
    pub denominator: Option<String>,
    #[serde(default)]
    pub on_zero: Option<ZeroPolicy>,
}

impl MetricConfig {
    pub fn is_ratio(&self) -> bool {
        self.ratio_of.is_some() || self.numerator.is_some() || self.denominator.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelationshipConfig {
    pub left_table: String,
    pub right_table: String,
    /// `(left_column, right_column)` pairs
    pub on: Vec<(String, String)>,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub join_kind: JoinKind,
}
