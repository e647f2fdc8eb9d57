//! Dependency analysis for ratio metrics
//!
//! Ratio inputs must be registered before the ratio itself, so the
//! dependency graph is acyclic by construction and plain recursion is safe.

use std::collections::BTreeSet;

use crate::error::ModelError;

use super::model::{FieldRef, Metric, MetricKind};
use super::registry::ModelRegistry;

/// Direct metric inputs of a metric (empty for aggregations)
pub fn extract_dependencies(metric: &Metric) -> Vec<FieldRef> {
    match &metric.kind {
        MetricKind::Ratio {
            numerator,
            denominator,
            ..
        } => vec![numerator.clone(), denominator.clone()],
        MetricKind::Aggregate { .. } => Vec::new(),
    }
}

/// Aggregate metrics a metric is ultimately computed from, in first-use order
pub fn leaf_metrics<'a>(
    registry: &'a ModelRegistry,
    metric: &'a Metric,
) -> Result<Vec<&'a Metric>, ModelError> {
    let mut leaves: Vec<&Metric> = Vec::new();
    collect_leaves(registry, metric, &mut leaves)?;
    Ok(leaves)
}

fn collect_leaves<'a>(
    registry: &'a ModelRegistry,
    metric: &'a Metric,
    leaves: &mut Vec<&'a Metric>,
) -> Result<(), ModelError> {
    match &metric.kind {
        MetricKind::Aggregate { .. } => {
            if !leaves.iter().any(|m| m.table == metric.table && m.name == metric.name) {
                leaves.push(metric);
            }
        }
        MetricKind::Ratio { .. } => {
            for input in extract_dependencies(metric) {
                let dependency = registry
                    .get_metric(&input.table, &input.field)
                    .ok_or_else(|| ModelError::UnknownField(input.to_string()))?;
                collect_leaves(registry, dependency, leaves)?;
            }
        }
    }
    Ok(())
}

/// Tables whose rows a metric aggregates
pub fn metric_tables(
    registry: &ModelRegistry,
    metric: &Metric,
) -> Result<BTreeSet<String>, ModelError> {
    Ok(leaf_metrics(registry, metric)?
        .into_iter()
        .map(|m| m.table.clone())
        .collect())
}
