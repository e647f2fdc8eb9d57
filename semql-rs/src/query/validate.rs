//! QueryValidator: checks a raw query against the registry

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::core::{
    metric_tables, operand_from_json, DataType, Dimension, Field, FieldRef, Grain,
    JoinGraphResolver, ModelRegistry, OperandError,
};
use crate::error::{ModelError, ValidationError};

use super::request::{
    Filter, FilterTarget, OrderBy, QueryRequest, RawFilter, SelectedDimension, SelectedMetric,
    SemanticQuery,
};

/// Validates and normalizes [`SemanticQuery`] values
pub struct QueryValidator<'a> {
    registry: &'a ModelRegistry,
}

fn unknown_field(reference: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::UnknownField {
        reference: reference.to_string(),
        reason: reason.into(),
    }
}

fn operand_error(reference: &str, error: OperandError) -> ValidationError {
    match error {
        OperandError::TypeMismatch { expected, found } => ValidationError::TypeMismatch {
            reference: reference.to_string(),
            expected,
            found,
        },
        OperandError::Invalid(reason) => ValidationError::InvalidFilter {
            reference: reference.to_string(),
            reason,
        },
    }
}

impl<'a> QueryValidator<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Self { registry }
    }

    /// Validate a query, returning its normalized form
    pub fn validate(&self, query: &SemanticQuery) -> Result<QueryRequest, ValidationError> {
        if query.dimensions.is_empty() && query.metrics.is_empty() {
            return Err(ValidationError::EmptySelection);
        }

        let mut dimensions = self.validate_dimensions(&query.dimensions)?;
        let mut metrics = self.validate_metrics(&query.metrics)?;
        assign_aliases(&mut dimensions, &mut metrics);

        let filters = query
            .filters
            .iter()
            .map(|f| self.validate_filter(f, &dimensions))
            .collect::<Result<Vec<_>, _>>()?;
        let order_by = self.validate_order_by(query, &dimensions, &metrics)?;

        let base_table = self.choose_base_table(&dimensions, &metrics)?;
        debug!(base = %base_table, "chose base table");

        let mut required_tables: BTreeSet<String> = BTreeSet::new();
        required_tables.insert(base_table.clone());
        required_tables.extend(dimensions.iter().map(|d| d.field.table.clone()));
        for metric in &metrics {
            required_tables.extend(self.aggregated_tables(&metric.field)?);
        }
        for filter in &filters {
            match filter.target {
                FilterTarget::Dimension(_) => {
                    required_tables.insert(filter.field.table.clone());
                }
                FilterTarget::Metric => {
                    required_tables.extend(self.aggregated_tables(&filter.field)?);
                }
            }
        }

        Ok(QueryRequest {
            base_table,
            dimensions,
            metrics,
            filters,
            order_by,
            limit: query.limit,
            required_tables,
        })
    }

    fn parse(&self, raw: &str) -> Result<(FieldRef, Option<String>), ValidationError> {
        self.registry.parse_reference(raw).map_err(|_| {
            unknown_field(
                raw,
                "not defined in the model (use table.field when the name is ambiguous)",
            )
        })
    }

    fn dimension(&self, raw: &str, field: &FieldRef) -> Result<&'a Dimension, ValidationError> {
        match self.registry.resolve_field(field) {
            Ok(resolved) => match resolved.field {
                Field::Dimension(dimension) => Ok(dimension),
                Field::Metric(_) => Err(unknown_field(raw, "is a metric, not a dimension")),
            },
            Err(e) => Err(unknown_field(raw, e.to_string())),
        }
    }

    fn check_grain(
        &self,
        raw: &str,
        dimension: &Dimension,
        grain: Option<String>,
    ) -> Result<Option<Grain>, ValidationError> {
        let Some(grain) = grain else {
            return Ok(None);
        };
        let supported = dimension.r#type.grains();
        let parsed = Grain::parse(&grain).filter(|g| supported.is_some_and(|s| s.contains(g)));
        match parsed {
            Some(g) => Ok(Some(g)),
            None => Err(ValidationError::InvalidDateGrain {
                reference: raw.to_string(),
                grain,
                supported: match supported {
                    Some(s) if !s.is_empty() => {
                        s.iter().map(Grain::as_str).collect::<Vec<_>>().join(", ")
                    }
                    _ => "none".to_string(),
                },
            }),
        }
    }

    fn validate_dimensions(
        &self,
        raw: &[String],
    ) -> Result<Vec<SelectedDimension>, ValidationError> {
        let mut selected: Vec<SelectedDimension> = Vec::new();
        for reference in raw {
            let (field, grain) = self.parse(reference)?;
            let dimension = self.dimension(reference, &field)?;
            let grain = self.check_grain(reference, dimension, grain)?;

            if selected.iter().any(|d| d.field == field && d.grain == grain) {
                return Err(ValidationError::DuplicateSelection(reference.clone()));
            }
            let alias = match grain {
                Some(g) => format!("{}__{}", field.field, g.as_str()),
                None => field.field.clone(),
            };
            selected.push(SelectedDimension {
                data_type: dimension.data_type(),
                field,
                grain,
                alias,
            });
        }
        Ok(selected)
    }

    fn validate_metrics(&self, raw: &[String]) -> Result<Vec<SelectedMetric>, ValidationError> {
        let mut selected: Vec<SelectedMetric> = Vec::new();
        for reference in raw {
            let (field, grain) = self.parse(reference)?;
            if grain.is_some() {
                return Err(unknown_field(reference, "metrics do not take a grain suffix"));
            }
            match self.registry.resolve_field(&field) {
                Ok(resolved) if matches!(resolved.field, Field::Metric(_)) => {}
                Ok(_) => return Err(unknown_field(reference, "is a dimension, not a metric")),
                Err(e) => return Err(unknown_field(reference, e.to_string())),
            }
            if selected.iter().any(|m| m.field == field) {
                return Err(ValidationError::DuplicateSelection(reference.clone()));
            }
            selected.push(SelectedMetric {
                alias: field.field.clone(),
                field,
            });
        }
        Ok(selected)
    }

    fn validate_filter(
        &self,
        raw: &RawFilter,
        dimensions: &[SelectedDimension],
    ) -> Result<Filter, ValidationError> {
        let reference = raw.field.as_str();
        let (field, grain) = self.parse(reference)?;
        let resolved = self
            .registry
            .resolve_field(&field)
            .map_err(|e| unknown_field(reference, e.to_string()))?;

        match resolved.field {
            Field::Dimension(dimension) => {
                let grain = self.check_grain(reference, dimension, grain)?;
                let operand = operand_from_json(dimension.data_type(), raw.op, &raw.value)
                    .map_err(|e| operand_error(reference, e))?;
                if raw.post_aggregate
                    && !dimensions.iter().any(|d| d.field == field && d.grain == grain)
                {
                    return Err(ValidationError::InvalidFilter {
                        reference: reference.to_string(),
                        reason: "post-aggregate filters on dimensions require the dimension to be selected"
                            .into(),
                    });
                }
                Ok(Filter {
                    field,
                    grain,
                    target: FilterTarget::Dimension(dimension.data_type()),
                    op: raw.op,
                    operand,
                    post_aggregate: raw.post_aggregate,
                })
            }
            Field::Metric(_) => {
                if grain.is_some() {
                    return Err(unknown_field(reference, "metrics do not take a grain suffix"));
                }
                let operand = operand_from_json(DataType::Number, raw.op, &raw.value)
                    .map_err(|e| operand_error(reference, e))?;
                Ok(Filter {
                    field,
                    grain: None,
                    target: FilterTarget::Metric,
                    op: raw.op,
                    operand,
                    post_aggregate: true,
                })
            }
        }
    }

    fn validate_order_by(
        &self,
        query: &SemanticQuery,
        dimensions: &[SelectedDimension],
        metrics: &[SelectedMetric],
    ) -> Result<Vec<OrderBy>, ValidationError> {
        let mut order_by = Vec::new();
        for entry in &query.order_by {
            let (reference, direction) = entry.parts();

            let by_alias = dimensions
                .iter()
                .map(|d| &d.alias)
                .chain(metrics.iter().map(|m| &m.alias))
                .find(|alias| alias.as_str() == reference);

            let alias = match by_alias {
                Some(alias) => alias.clone(),
                None => {
                    let (field, grain) = self.parse(reference)?;
                    let grain = grain.as_deref().and_then(Grain::parse);
                    dimensions
                        .iter()
                        .find(|d| d.field == field && d.grain == grain)
                        .map(|d| d.alias.clone())
                        .or_else(|| {
                            metrics
                                .iter()
                                .find(|m| m.field == field)
                                .map(|m| m.alias.clone())
                        })
                        .ok_or_else(|| ValidationError::UnknownOrderField(reference.to_string()))?
                }
            };
            order_by.push(OrderBy { alias, direction });
        }
        Ok(order_by)
    }

    /// Tables a metric aggregates rows of
    fn aggregated_tables(&self, field: &FieldRef) -> Result<BTreeSet<String>, ValidationError> {
        let metric = self
            .registry
            .get_metric(&field.table, &field.field)
            .ok_or_else(|| unknown_field(&field.to_string(), "metric is not defined"))?;
        metric_tables(self.registry, metric)
            .map_err(|e: ModelError| unknown_field(&field.to_string(), e.to_string()))
    }

    /// Pick the table contributing the most selected fields
    ///
    /// Ties go to the earliest registered table that can reach every other
    /// tied table.
    fn choose_base_table(
        &self,
        dimensions: &[SelectedDimension],
        metrics: &[SelectedMetric],
    ) -> Result<String, ValidationError> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for table in dimensions
            .iter()
            .map(|d| d.field.table.as_str())
            .chain(metrics.iter().map(|m| m.field.table.as_str()))
        {
            *counts.entry(table).or_default() += 1;
        }

        let max = counts.values().copied().max().unwrap_or(0);
        let mut candidates: Vec<&str> = counts
            .iter()
            .filter(|(_, &count)| count == max)
            .map(|(&table, _)| table)
            .collect();
        candidates.sort_by_key(|t| self.registry.table_position(t));

        if let [only] = candidates.as_slice() {
            return Ok(only.to_string());
        }

        let resolver = JoinGraphResolver::new(self.registry);
        for candidate in &candidates {
            let reachable = resolver.reachable(candidate);
            if candidates.iter().all(|t| reachable.contains(*t)) {
                return Ok(candidate.to_string());
            }
        }

        Err(ValidationError::ConflictingBaseTable {
            tables: candidates.join(", "),
        })
    }
}

/// Disambiguate aliases shared by fields of different tables as `table_alias`
fn assign_aliases(dimensions: &mut [SelectedDimension], metrics: &mut [SelectedMetric]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for alias in dimensions
        .iter()
        .map(|d| &d.alias)
        .chain(metrics.iter().map(|m| &m.alias))
    {
        *seen.entry(alias.clone()).or_default() += 1;
    }

    for dimension in dimensions.iter_mut() {
        if seen[&dimension.alias] > 1 {
            dimension.alias = format!("{}_{}", dimension.field.table, dimension.alias);
        }
    }
    for metric in metrics.iter_mut() {
        if seen[&metric.alias] > 1 {
            metric.alias = format!("{}_{}", metric.field.table, metric.alias);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FilterOp, Metric, Relationship, Table};
    use crate::query::request::{RawOrderBy, SortDirection};
    use serde_json::json;

    fn create_test_registry() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry.register_table(Table::new("orders", "shop.orders")).unwrap();
        registry.register_table(Table::new("customers", "shop.customers")).unwrap();
        registry.register_table(Table::new("products", "shop.products")).unwrap();
        registry.register_table(Table::new("suppliers", "shop.suppliers")).unwrap();

        registry.register_dimension(Dimension::string("orders", "status")).unwrap();
        registry
            .register_dimension(Dimension::timestamp(
                "orders",
                "created_at",
                [Grain::Day, Grain::Month],
            ))
            .unwrap();
        registry.register_dimension(Dimension::string("customers", "country")).unwrap();
        registry.register_dimension(Dimension::string("customers", "status")).unwrap();
        registry.register_dimension(Dimension::string("products", "category")).unwrap();
        registry.register_dimension(Dimension::string("suppliers", "name")).unwrap();

        registry.register_metric(Metric::sum("orders", "revenue", "amount")).unwrap();
        registry.register_metric(Metric::count("customers", "customer_count")).unwrap();
        registry.register_metric(Metric::count("products", "product_count")).unwrap();

        registry
            .register_relationship(
                Relationship::many_to_one("orders", "customers").on("customer_id", "id"),
            )
            .unwrap();
        registry
            .register_relationship(
                Relationship::many_to_one("products", "suppliers").on("supplier_id", "id"),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_empty_selection() {
        let registry = create_test_registry();
        let err = QueryValidator::new(&registry)
            .validate(&SemanticQuery::new())
            .unwrap_err();
        assert_eq!(err, ValidationError::EmptySelection);
    }

    #[test]
    fn test_unknown_field() {
        let registry = create_test_registry();
        let query = SemanticQuery::new().with_metrics(["orders.profit"]);
        let err = QueryValidator::new(&registry).validate(&query).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnknownField { reference, .. } if reference == "orders.profit"
        ));

        let query = SemanticQuery::new().with_metrics(["orders.status"]);
        assert!(matches!(
            QueryValidator::new(&registry).validate(&query),
            Err(ValidationError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_grain_validation() {
        let registry = create_test_registry();
        let validator = QueryValidator::new(&registry);

        let ok = validator
            .validate(&SemanticQuery::new().with_dimensions(["orders.created_at__month"]))
            .unwrap();
        assert_eq!(ok.dimensions[0].grain, Some(Grain::Month));
        assert_eq!(ok.dimensions[0].alias, "created_at__month");

        let err = validator
            .validate(&SemanticQuery::new().with_dimensions(["orders.created_at__year"]))
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidDateGrain { ref supported, .. } if supported == "day, month"
        ));

        let err = validator
            .validate(&SemanticQuery::new().with_dimensions(["orders.status__month"]))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidDateGrain { .. }));
    }

    #[test]
    fn test_filter_type_mismatch() {
        let registry = create_test_registry();
        let query = SemanticQuery::new()
            .with_metrics(["orders.revenue"])
            .with_filter(RawFilter::new("orders.status", FilterOp::Eq, json!(5)));
        let err = QueryValidator::new(&registry).validate(&query).unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { .. }));

        let query = SemanticQuery::new()
            .with_metrics(["orders.revenue"])
            .with_filter(RawFilter::new(
                "orders.created_at",
                FilterOp::DateRange,
                json!(["2024-01-01", "not a date"]),
            ));
        let err = QueryValidator::new(&registry).validate(&query).unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { .. }));
    }

    #[test]
    fn test_metric_filter_is_post_aggregate() {
        let registry = create_test_registry();
        let query = SemanticQuery::new()
            .with_metrics(["orders.revenue"])
            .with_dimensions(["orders.status"])
            .with_filter(RawFilter::new("revenue", FilterOp::Gt, json!(1000)));
        let request = QueryValidator::new(&registry).validate(&query).unwrap();
        assert!(request.filters[0].post_aggregate);
        assert_eq!(request.filters[0].target, FilterTarget::Metric);
    }

    #[test]
    fn test_post_aggregate_dimension_must_be_selected() {
        let registry = create_test_registry();
        let query = SemanticQuery::new()
            .with_metrics(["orders.revenue"])
            .with_filter(
                RawFilter::new("orders.status", FilterOp::Eq, json!("open")).post_aggregate(),
            );
        assert!(matches!(
            QueryValidator::new(&registry).validate(&query),
            Err(ValidationError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_base_table_most_fields_wins() {
        let registry = create_test_registry();
        let query = SemanticQuery::new()
            .with_metrics(["orders.revenue", "customers.customer_count"])
            .with_dimensions(["customers.country", "orders.status"]);
        let request = QueryValidator::new(&registry).validate(&query).unwrap();
        // two fields each: registration order decides
        assert_eq!(request.base_table, "orders");

        let query = SemanticQuery::new()
            .with_dimensions(["customers.country"])
            .with_metrics(["customers.customer_count", "orders.revenue"]);
        let request = QueryValidator::new(&registry).validate(&query).unwrap();
        assert_eq!(request.base_table, "customers");
    }

    #[test]
    fn test_conflicting_base_table() {
        let registry = create_test_registry();
        let query = SemanticQuery::new()
            .with_dimensions(["orders.status"])
            .with_metrics(["products.product_count"]);
        let err = QueryValidator::new(&registry).validate(&query).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ConflictingBaseTable {
                tables: "orders, products".into()
            }
        );
    }

    #[test]
    fn test_alias_collision_and_duplicates() {
        let registry = create_test_registry();
        let query = SemanticQuery::new().with_dimensions(["orders.status", "customers.status"]);
        let request = QueryValidator::new(&registry).validate(&query).unwrap();
        assert_eq!(request.dimensions[0].alias, "orders_status");
        assert_eq!(request.dimensions[1].alias, "customers_status");

        let query = SemanticQuery::new().with_dimensions(["orders.status", "orders.status"]);
        assert!(matches!(
            QueryValidator::new(&registry).validate(&query),
            Err(ValidationError::DuplicateSelection(_))
        ));
    }

    #[test]
    fn test_order_by_resolution() {
        let registry = create_test_registry();
        let query = SemanticQuery::new()
            .with_dimensions(["orders.status"])
            .with_metrics(["orders.revenue"])
            .with_order_by(RawOrderBy::desc("orders.revenue"))
            .with_order_by(RawOrderBy::Text("status".into()));
        let request = QueryValidator::new(&registry).validate(&query).unwrap();
        assert_eq!(
            request.order_by,
            vec![
                OrderBy {
                    alias: "revenue".into(),
                    direction: SortDirection::Desc
                },
                OrderBy {
                    alias: "status".into(),
                    direction: SortDirection::Asc
                },
            ]
        );

        let query = SemanticQuery::new()
            .with_metrics(["orders.revenue"])
            .with_order_by(RawOrderBy::asc("customers.country"));
        assert!(matches!(
            QueryValidator::new(&registry).validate(&query),
            Err(ValidationError::UnknownOrderField(_))
        ));
    }

    #[test]
    fn test_required_tables() {
        let registry = create_test_registry();
        let query = SemanticQuery::new()
            .with_metrics(["orders.revenue"])
            .with_filter(RawFilter::new("customers.country", FilterOp::In, json!(["DE", "FR"])));
        let request = QueryValidator::new(&registry).validate(&query).unwrap();
        assert_eq!(request.base_table, "orders");
        assert!(request.required_tables.contains("customers"));
    }
}
