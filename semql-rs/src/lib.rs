//! # semql
//!
//! Compiles queries against a semantic model (tables, dimensions, metrics,
//! relationships) into a single BigQuery statement that stays correct when
//! joins fan out.
//!
//! ```text
//! SemanticQuery ─▶ QueryValidator ─▶ JoinGraphResolver ─▶ AggregationPlanner ─▶ SqlGenerator ─▶ SQL
//!                        ▲                   ▲                     ▲
//!                        └────────── ModelRegistry (built once, read-only) ──┘
//! ```
//!
//! ```no_run
//! use semql::{config, SemanticQuery};
//!
//! let model = config::load_from_file("model.yml")?;
//! let query = SemanticQuery::new()
//!     .with_dimensions(["orders.created_at__month"])
//!     .with_metrics(["orders.revenue"]);
//! let sql = model.generator().generate(&query)?;
//! # Ok::<(), semql::SemqlError>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod query;
pub mod sql;

pub use crate::config::{CompileOptions, SemanticModel};
pub use crate::core::{
    Aggregation, Cardinality, DataType, Dimension, Grain, JoinKind, Metric, ModelRegistry,
    Relationship, Table, ZeroPolicy,
};
pub use crate::error::{Result, SemqlError};
pub use crate::query::{RawFilter, RawOrderBy, SemanticQuery};
pub use crate::sql::{CompiledQuery, OutputColumn, SqlGenerator};

/// Compile one query against a registry with default options
pub fn compile(registry: &ModelRegistry, query: &SemanticQuery) -> Result<CompiledQuery> {
    SqlGenerator::new(registry).compile(query)
}
