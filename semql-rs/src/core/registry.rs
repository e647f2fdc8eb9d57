//! ModelRegistry: validated tables, fields, and relationships
//!
//! The registry is built once (usually by [`crate::config`]) and then only
//! read. Compilations borrow it immutably, so any number of them can share
//! one instance, e.g. behind an `Arc`.

use std::collections::{BTreeMap, HashMap};

use crate::error::ModelError;

use super::model::{Aggregation, Dimension, FieldRef, Metric, MetricKind, Relationship, Table};
use super::value::{check_operand, OperandError};

/// A field resolved to its definition
#[derive(Debug, Clone, Copy)]
pub enum Field<'a> {
    Dimension(&'a Dimension),
    Metric(&'a Metric),
}

/// Result of [`ModelRegistry::resolve_field`]
#[derive(Debug, Clone, Copy)]
pub struct ResolvedField<'a> {
    pub table: &'a Table,
    pub field: Field<'a>,
}

#[derive(Debug, Clone)]
struct TableEntry {
    table: Table,
    dimensions: Vec<Dimension>,
    metrics: Vec<Metric>,
}

impl TableEntry {
    fn has_field(&self, name: &str) -> bool {
        self.dimensions.iter().any(|d| d.name == name)
            || self.metrics.iter().any(|m| m.name == name)
    }
}

/// One direction of a relationship in the adjacency list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Edge {
    pub relationship: usize,
    /// Traversed right to left
    pub reversed: bool,
}

/// Holds every table, dimension, metric, and relationship of a model
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: Vec<TableEntry>,
    index: HashMap<String, usize>,
    relationships: Vec<Relationship>,
    /// table -> neighbour -> edges, sorted for deterministic traversal
    adjacency: BTreeMap<String, BTreeMap<String, Vec<Edge>>>,
}

fn check_name(reference: &str, name: &str) -> Result<(), ModelError> {
    if name.is_empty() || name.contains('.') || name.contains("__") {
        return Err(ModelError::InvalidDefinition {
            reference: reference.to_string(),
            reason: "names must be non-empty and contain neither '.' nor '__'".into(),
        });
    }
    Ok(())
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table
    pub fn register_table(&mut self, table: Table) -> Result<(), ModelError> {
        check_name(&table.name, &table.name)?;
        if self.index.contains_key(&table.name) {
            return Err(ModelError::DuplicateTable(table.name));
        }
        if table.source.trim().is_empty() {
            return Err(ModelError::InvalidDefinition {
                reference: table.name,
                reason: "source reference is empty".into(),
            });
        }

        self.index.insert(table.name.clone(), self.entries.len());
        self.adjacency.entry(table.name.clone()).or_default();
        self.entries.push(TableEntry {
            table,
            dimensions: Vec::new(),
            metrics: Vec::new(),
        });
        Ok(())
    }

    fn entry_for_field(&mut self, table: &str, field: &str) -> Result<&mut TableEntry, ModelError> {
        let idx = *self
            .index
            .get(table)
            .ok_or_else(|| ModelError::UnknownTable(table.to_string()))?;
        let entry = &mut self.entries[idx];
        if entry.has_field(field) {
            return Err(ModelError::DuplicateField {
                table: table.to_string(),
                field: field.to_string(),
            });
        }
        Ok(entry)
    }

    /// Register a dimension on an already registered table
    pub fn register_dimension(&mut self, dimension: Dimension) -> Result<(), ModelError> {
        let reference = dimension.reference().to_string();
        check_name(&reference, &dimension.name)?;
        if dimension.expr.trim().is_empty() {
            return Err(ModelError::InvalidDefinition {
                reference,
                reason: "expression is empty".into(),
            });
        }

        let entry = self.entry_for_field(&dimension.table, &dimension.name)?;
        entry.dimensions.push(dimension);
        Ok(())
    }

    /// Register a metric; ratio inputs must already be registered
    pub fn register_metric(&mut self, mut metric: Metric) -> Result<(), ModelError> {
        let reference = metric.reference().to_string();
        check_name(&reference, &metric.name)?;
        if !self.index.contains_key(&metric.table) {
            return Err(ModelError::UnknownTable(metric.table.clone()));
        }

        match &mut metric.kind {
            MetricKind::Aggregate { agg, expr, filters } => {
                let expr = expr.trim();
                if expr.is_empty() {
                    return Err(ModelError::InvalidDefinition {
                        reference,
                        reason: "expression is empty".into(),
                    });
                }
                if expr == "*" && *agg != Aggregation::Count {
                    return Err(ModelError::InvalidDefinition {
                        reference,
                        reason: format!("'*' is only valid for count, not {}", agg.as_sql()),
                    });
                }
                for filter in filters.iter_mut() {
                    let dimension = self
                        .get_dimension(&metric.table, &filter.field)
                        .ok_or_else(|| {
                            ModelError::UnknownField(format!("{}.{}", metric.table, filter.field))
                        })?;
                    filter.operand.coerce_to(dimension.data_type());
                    check_operand(dimension.data_type(), filter.op, &filter.operand).map_err(
                        |e| ModelError::InvalidDefinition {
                            reference: reference.clone(),
                            reason: match e {
                                OperandError::TypeMismatch { expected, found } => format!(
                                    "filter on '{}' expects {expected}, got {found}",
                                    filter.field
                                ),
                                OperandError::Invalid(reason) => reason,
                            },
                        },
                    )?;
                }
            }
            MetricKind::Ratio {
                numerator,
                denominator,
                ..
            } => {
                for input in [numerator, denominator] {
                    if self.get_metric(&input.table, &input.field).is_none() {
                        return Err(ModelError::UnknownField(input.to_string()));
                    }
                }
            }
        }

        let entry = self.entry_for_field(&metric.table, &metric.name)?;
        entry.metrics.push(metric);
        Ok(())
    }

    /// Register a relationship between two registered tables
    pub fn register_relationship(&mut self, relationship: Relationship) -> Result<(), ModelError> {
        let bad = |reason: &str| ModelError::BadRelationship {
            left: relationship.left_table.clone(),
            right: relationship.right_table.clone(),
            reason: reason.to_string(),
        };

        for table in [&relationship.left_table, &relationship.right_table] {
            if !self.index.contains_key(table) {
                return Err(ModelError::UnknownTable(table.clone()));
            }
        }
        if relationship.left_table == relationship.right_table {
            return Err(bad("a table cannot be related to itself"));
        }
        if relationship.keys.is_empty() {
            return Err(bad("at least one join key pair is required"));
        }
        if relationship
            .keys
            .iter()
            .any(|(l, r)| l.trim().is_empty() || r.trim().is_empty())
        {
            return Err(bad("join key columns must be non-empty"));
        }

        let idx = self.relationships.len();
        self.adjacency
            .entry(relationship.left_table.clone())
            .or_default()
            .entry(relationship.right_table.clone())
            .or_default()
            .push(Edge {
                relationship: idx,
                reversed: false,
            });
        self.adjacency
            .entry(relationship.right_table.clone())
            .or_default()
            .entry(relationship.left_table.clone())
            .or_default()
            .push(Edge {
                relationship: idx,
                reversed: true,
            });
        self.relationships.push(relationship);
        Ok(())
    }

    /// Resolve a `table.field` reference to its table and definition
    pub fn resolve_field(&self, reference: &FieldRef) -> Result<ResolvedField<'_>, ModelError> {
        let entry = self
            .index
            .get(&reference.table)
            .map(|&idx| &self.entries[idx])
            .ok_or_else(|| ModelError::UnknownField(reference.to_string()))?;

        let field = entry
            .dimensions
            .iter()
            .find(|d| d.name == reference.field)
            .map(Field::Dimension)
            .or_else(|| {
                entry
                    .metrics
                    .iter()
                    .find(|m| m.name == reference.field)
                    .map(Field::Metric)
            })
            .ok_or_else(|| ModelError::UnknownField(reference.to_string()))?;

        Ok(ResolvedField {
            table: &entry.table,
            field,
        })
    }

    /// Parse `table.field[__grain]` or a bare `field[__grain]`
    ///
    /// A bare field name must be owned by exactly one table.
    /// Returns the reference and the raw grain suffix, if any.
    pub fn parse_reference(
        &self,
        reference: &str,
    ) -> Result<(FieldRef, Option<String>), ModelError> {
        let (qualifier, rest) = match reference.split_once('.') {
            Some((table, rest)) => (Some(table), rest),
            None => (None, reference),
        };
        let (field, grain) = match rest.split_once("__") {
            Some((field, grain)) => (field, Some(grain.to_string())),
            None => (rest, None),
        };
        if field.is_empty() || rest.contains('.') {
            return Err(ModelError::UnknownField(reference.to_string()));
        }

        let field_ref = match qualifier {
            Some(table) => FieldRef::new(table, field),
            None => {
                let owners: Vec<&TableEntry> =
                    self.entries.iter().filter(|e| e.has_field(field)).collect();
                match owners.as_slice() {
                    [owner] => FieldRef::new(&owner.table.name, field),
                    _ => return Err(ModelError::UnknownField(reference.to_string())),
                }
            }
        };
        Ok((field_ref, grain))
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.index.get(name).map(|&idx| &self.entries[idx].table)
    }

    /// Position of a table in registration order
    pub fn table_position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// All tables in registration order
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.entries.iter().map(|e| &e.table)
    }

    pub fn get_dimension(&self, table: &str, name: &str) -> Option<&Dimension> {
        let entry = &self.entries[*self.index.get(table)?];
        entry.dimensions.iter().find(|d| d.name == name)
    }

    pub fn get_metric(&self, table: &str, name: &str) -> Option<&Metric> {
        let entry = &self.entries[*self.index.get(table)?];
        entry.metrics.iter().find(|m| m.name == name)
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Neighbours of a table with the edges leading to each, sorted by name
    pub(crate) fn neighbours(&self, table: &str) -> impl Iterator<Item = (&String, &Vec<Edge>)> {
        self.adjacency.get(table).into_iter().flat_map(|m| m.iter())
    }
}
