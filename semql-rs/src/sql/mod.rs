//! SQL generation: aggregation planning, statement building, rendering

pub mod dialect;
mod generator;
mod planner;
mod render;
pub mod statement;

pub use generator::{CompiledQuery, OutputColumn, SqlGenerator};
pub use planner::{
    AggregationBranch, AggregationPlan, AggregationPlanner, BranchMeasure, HavingFilter, Measure,
    RootColumn, SemiJoin,
};
pub use render::render;
