//! Configuration loading for semantic models
//!
//! Model documents are YAML or JSON; query requests are JSON.

mod loader;
mod schema;

pub use loader::{
    build, load_from_directory, load_from_file, load_from_string, load_model,
    load_request_from_file, load_request_from_str, parse_model, SemanticModel,
};
pub use schema::{
    CompileOptions, DimensionConfig, KeyColumns, MetricConfig, MetricFilterConfig, ModelConfig,
    RelationshipConfig, TableConfig,
};
