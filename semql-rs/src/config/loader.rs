//! Builds a [`ModelRegistry`] from model documents

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::core::{
    operand_from_json, Aggregation, DataType, Dimension, DimensionType, FieldRef, Grain, Metric,
    MetricKind, ModelRegistry, OperandError, Relationship, Table,
};
use crate::error::{ModelError, Result, SemqlError};
use crate::query::SemanticQuery;
use crate::sql::SqlGenerator;

use super::schema::{CompileOptions, DimensionConfig, MetricConfig, ModelConfig, RelationshipConfig};

/// A built registry and the options its documents declared
#[derive(Debug, Clone)]
pub struct SemanticModel {
    pub registry: ModelRegistry,
    pub options: CompileOptions,
}

impl SemanticModel {
    /// A generator bound to this model and its options
    pub fn generator(&self) -> SqlGenerator<'_> {
        SqlGenerator::new(&self.registry).with_options(self.options)
    }
}

fn config_error(context: impl std::fmt::Display, error: impl std::fmt::Display) -> SemqlError {
    SemqlError::Config(format!("{context}: {error}"))
}

/// Parse one YAML or JSON model document
pub fn parse_model(text: &str) -> Result<ModelConfig> {
    serde_yaml::from_str(text).map_err(|e| config_error("invalid model document", e))
}

/// Load a model from a YAML or JSON string
pub fn load_from_string(text: &str) -> Result<SemanticModel> {
    build(parse_model(text)?)
}

/// Load a model from a single file
pub fn load_from_file(path: impl AsRef<Path>) -> Result<SemanticModel> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| config_error(path.display(), e))?;
    let config = parse_model(&text).map_err(|e| match e {
        SemqlError::Config(message) => SemqlError::Config(format!("{}: {message}", path.display())),
        other => other,
    })?;
    build(config)
}

/// Load every `.yml`, `.yaml`, and `.json` file of a directory, in file
/// name order, as one model
pub fn load_from_directory(dir: impl AsRef<Path>) -> Result<SemanticModel> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| config_error(dir.display(), e))? {
        let path = entry.map_err(|e| config_error(dir.display(), e))?.path();
        let is_model = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext, "yml" | "yaml" | "json"));
        if path.is_file() && is_model {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(config_error(dir.display(), "no .yml, .yaml, or .json model files"));
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut merged = ModelConfig::default();
    for path in &files {
        debug!(file = %path.display(), "reading model file");
        let text = fs::read_to_string(path).map_err(|e| config_error(path.display(), e))?;
        let config: ModelConfig =
            serde_yaml::from_str(&text).map_err(|e| config_error(path.display(), e))?;
        merged.merge(config);
    }
    build(merged)
}

/// Load a model from a file or a directory of files
pub fn load_model(path: impl AsRef<Path>) -> Result<SemanticModel> {
    let path = path.as_ref();
    if path.is_dir() {
        load_from_directory(path)
    } else {
        load_from_file(path)
    }
}

/// Parse a JSON query request
pub fn load_request_from_str(text: &str) -> Result<SemanticQuery> {
    serde_json::from_str(text).map_err(|e| config_error("invalid query request", e))
}

/// Read and parse a JSON query request file
pub fn load_request_from_file(path: impl AsRef<Path>) -> Result<SemanticQuery> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| config_error(path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| config_error(path.display(), e))
}

/// Register every section in dependency order: tables, dimensions,
/// aggregate metrics, ratios, relationships
pub fn build(config: ModelConfig) -> Result<SemanticModel> {
    let mut registry = ModelRegistry::new();

    for table in config.tables {
        let mut definition = Table::new(table.name, table.source);
        definition.primary_key = table.primary_key.map(|k| k.into_vec()).unwrap_or_default();
        registry.register_table(definition)?;
    }
    for dimension in &config.dimensions {
        registry.register_dimension(dimension_from_config(dimension)?)?;
    }

    let (ratios, aggregates): (Vec<&MetricConfig>, Vec<&MetricConfig>) =
        config.metrics.iter().partition(|m| m.is_ratio());
    for metric in aggregates {
        let metric = aggregate_from_config(&registry, metric)?;
        registry.register_metric(metric)?;
    }
    for metric in ratios {
        registry.register_metric(ratio_from_config(metric)?)?;
    }

    for relationship in &config.relationships {
        registry.register_relationship(relationship_from_config(relationship))?;
    }

    let options = config.options.unwrap_or_default();
    info!(
        tables = registry.tables().count(),
        relationships = registry.relationships().len(),
        "loaded semantic model"
    );
    Ok(SemanticModel { registry, options })
}

fn invalid(reference: String, reason: impl Into<String>) -> ModelError {
    ModelError::InvalidDefinition {
        reference,
        reason: reason.into(),
    }
}

fn dimension_from_config(config: &DimensionConfig) -> Result<Dimension> {
    let reference = format!("{}.{}", config.table, config.name);
    let grains = || -> Vec<Grain> {
        config.grains.clone().unwrap_or_else(|| Grain::ALL.to_vec())
    };
    let r#type = match config.data_type {
        DataType::Date => DimensionType::Date {
            grains: grains().into_iter().collect(),
        },
        DataType::Timestamp => DimensionType::Timestamp {
            grains: grains().into_iter().collect(),
        },
        other => {
            if config.grains.as_ref().is_some_and(|g| !g.is_empty()) {
                return Err(invalid(
                    reference,
                    format!("grains are not valid on a {other} dimension"),
                )
                .into());
            }
            match other {
                DataType::Number => DimensionType::Number,
                DataType::Boolean => DimensionType::Boolean,
                _ => DimensionType::String,
            }
        }
    };

    let mut dimension = Dimension::new(&config.table, &config.name, r#type);
    if let Some(expr) = &config.expr {
        dimension = dimension.with_expr(expr);
    }
    Ok(dimension)
}

fn aggregate_from_config(registry: &ModelRegistry, config: &MetricConfig) -> Result<Metric> {
    let reference = format!("{}.{}", config.table, config.name);
    let agg = config
        .agg
        .ok_or_else(|| invalid(reference.clone(), "needs either 'agg' or 'ratio_of'"))?;
    let expr = match (&config.expr, agg) {
        (Some(expr), _) => expr.clone(),
        (None, Aggregation::Count) => "*".to_string(),
        (None, _) => String::new(),
    };

    let mut metric = Metric::aggregate(&config.table, &config.name, agg, expr);
    for filter in &config.filters {
        let dimension = registry
            .get_dimension(&config.table, &filter.field)
            .ok_or_else(|| ModelError::UnknownField(format!("{}.{}", config.table, filter.field)))?;
        let operand = operand_from_json(dimension.data_type(), filter.op, &filter.value).map_err(
            |e| {
                invalid(
                    reference.clone(),
                    match e {
                        OperandError::TypeMismatch { expected, found } => format!(
                            "filter on '{}' expects {expected}, got {found}",
                            filter.field
                        ),
                        OperandError::Invalid(reason) => reason,
                    },
                )
            },
        )?;
        metric = metric.with_filter(&filter.field, filter.op, operand);
    }
    Ok(metric)
}

fn ratio_from_config(config: &MetricConfig) -> Result<Metric> {
    let reference = format!("{}.{}", config.table, config.name);
    if config.agg.is_some() {
        return Err(invalid(reference, "a ratio cannot also declare 'agg'").into());
    }
    let inputs = (&config.ratio_of, &config.numerator, &config.denominator);
    let (numerator, denominator) = match inputs {
        (Some(inputs), None, None) => match inputs.as_slice() {
            [n, d] => (n.clone(), d.clone()),
            _ => return Err(invalid(reference, "'ratio_of' takes exactly two metrics").into()),
        },
        (None, Some(n), Some(d)) => (n.clone(), d.clone()),
        _ => {
            return Err(invalid(
                reference,
                "use either 'ratio_of' or both 'numerator' and 'denominator'",
            )
            .into())
        }
    };

    Ok(Metric {
        table: config.table.clone(),
        name: config.name.clone(),
        kind: MetricKind::Ratio {
            numerator: FieldRef::qualify(&numerator, &config.table),
            denominator: FieldRef::qualify(&denominator, &config.table),
            on_zero: config.on_zero.unwrap_or_default(),
        },
    })
}

fn relationship_from_config(config: &RelationshipConfig) -> Relationship {
    let mut relationship =
        Relationship::new(&config.left_table, &config.right_table, config.cardinality)
            .with_join_kind(config.join_kind);
    for (left, right) in &config.on {
        relationship = relationship.on(left, right);
    }
    relationship
}
