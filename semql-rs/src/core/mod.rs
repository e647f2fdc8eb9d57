//! Core semantic layer types, registry, and join graph

mod dependency;
mod graph;
mod model;
mod registry;
mod value;

pub use dependency::{extract_dependencies, leaf_metrics, metric_tables};
pub use graph::{JoinGraphResolver, JoinPlan, JoinStep, ResolvedJoin, DEFAULT_MAX_FRONTIER};
pub use model::{
    Aggregation, Cardinality, DataType, Dimension, DimensionType, FieldRef, Grain, JoinKind,
    Metric, MetricFilter, MetricKind, Relationship, Table, ZeroPolicy,
};
pub use registry::{Field, ModelRegistry, ResolvedField};
pub use value::{
    check_operand, literal_from_json, operand_from_json, FilterOp, Literal, Operand, OperandError,
};
