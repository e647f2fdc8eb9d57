//! AggregationPlanner: decides where each metric is aggregated
//!
//! A metric whose rows are reached from the base without crossing a
//! one_to_many or many_to_many hop aggregates directly in the outer query.
//! Anything behind such a hop is pre-aggregated in a grouped branch keyed by
//! the columns of the first fan-out hop, then joined back to the table on
//! the near side of that hop (the anchor). Branch rows are unique per anchor
//! key, so the outer join never duplicates base rows.

use std::collections::BTreeSet;

use tracing::debug;

use crate::core::{
    Aggregation, FieldRef, JoinKind, JoinPlan, JoinStep, Metric, MetricFilter, MetricKind,
    ModelRegistry, ZeroPolicy,
};
use crate::error::{ModelError, RenderError, ResolutionError, Result};
use crate::query::{Filter, FilterTarget, QueryRequest, SelectedDimension};

/// How a metric value is obtained in the outer query
#[derive(Debug, Clone, PartialEq)]
pub enum Measure {
    /// Aggregated over the outer query's joined rows
    Direct(FieldRef),
    /// Re-aggregated from a branch column
    Branch { branch: usize, metric: FieldRef },
    /// Null-safe division of two measures
    Ratio {
        metric: FieldRef,
        numerator: Box<Measure>,
        denominator: Box<Measure>,
        on_zero: ZeroPolicy,
    },
}

/// An output column of the outer query
#[derive(Debug, Clone, PartialEq)]
pub enum RootColumn {
    Dimension(SelectedDimension),
    Metric { alias: String, measure: Measure },
}

/// A leaf metric aggregated inside a branch
#[derive(Debug, Clone, PartialEq)]
pub struct BranchMeasure {
    pub metric: FieldRef,
    pub agg: Aggregation,
    pub expr: String,
}

impl BranchMeasure {
    /// Columns the branch exposes for this measure
    pub fn columns(&self) -> Vec<String> {
        match self.agg {
            Aggregation::Avg => vec![self.sum_column(), self.count_column()],
            _ => vec![self.metric.field.clone()],
        }
    }

    pub fn sum_column(&self) -> String {
        format!("{}__sum", self.metric.field)
    }

    pub fn count_column(&self) -> String {
        format!("{}__count", self.metric.field)
    }
}

/// Branch key column name for the `index`th key pair
pub fn key_column(index: usize) -> String {
    format!("key__{index}")
}

/// A grouped subquery that pre-aggregates one source table
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationBranch {
    pub alias: String,
    /// Table whose rows the measures aggregate
    pub source: String,
    /// Outer-query table the branch joins back to
    pub anchor: String,
    /// Far side of the fan-out hop; the branch's FROM table
    pub head: String,
    /// `(anchor_column, head_column)` pairs of the fan-out hop
    pub keys: Vec<(String, String)>,
    pub join_kind: JoinKind,
    /// Joins inside the branch, starting at `head`
    pub joins: Vec<JoinStep>,
    /// Row filters applied before grouping
    pub filters: Vec<Filter>,
    pub measures: Vec<BranchMeasure>,
}

/// A correlated `EXISTS` restricting anchor rows to those with matching
/// related rows
#[derive(Debug, Clone, PartialEq)]
pub struct SemiJoin {
    pub anchor: String,
    pub head: String,
    pub keys: Vec<(String, String)>,
    pub joins: Vec<JoinStep>,
    pub filters: Vec<Filter>,
}

/// A post-grouping filter; `measure` is set for metric filters
#[derive(Debug, Clone, PartialEq)]
pub struct HavingFilter {
    pub filter: Filter,
    pub measure: Option<Measure>,
}

/// Branches plus the assembly of the outer query
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationPlan {
    pub base: String,
    /// Joins of the outer query, in join-plan order
    pub outer_joins: Vec<JoinStep>,
    pub branches: Vec<AggregationBranch>,
    /// Dimensions, then aggregate metrics, then ratios
    pub columns: Vec<RootColumn>,
    pub where_filters: Vec<Filter>,
    pub semi_joins: Vec<SemiJoin>,
    pub having: Vec<HavingFilter>,
}

pub struct AggregationPlanner<'a> {
    registry: &'a ModelRegistry,
}

/// Per-call working state
struct Builder<'p> {
    joins: &'p JoinPlan,
    /// Row filters on fan-out tables, waiting for a branch or a semi-join
    deferred: Vec<Filter>,
    branches: Vec<AggregationBranch>,
}

fn same_filters(a: &[Filter], b: &[Filter]) -> bool {
    a.len() == b.len() && a.iter().all(|f| b.contains(f))
}

/// Index of the first step where two paths from the base diverge
fn divergence(a: &[&JoinStep], b: &[&JoinStep]) -> usize {
    a.iter()
        .zip(b)
        .take_while(|(x, y)| x.to_table == y.to_table)
        .count()
}

impl<'a> AggregationPlanner<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Self { registry }
    }

    /// Plan a validated request over its resolved joins
    pub fn plan(&self, request: &QueryRequest, joins: &JoinPlan) -> Result<AggregationPlan> {
        let aggregating = !request.metrics.is_empty()
            || request.filters.iter().any(|f| f.target == FilterTarget::Metric);

        if aggregating {
            if let Some(dimension) = request
                .dimensions
                .iter()
                .find(|d| joins.fans_out(&d.field.table))
            {
                return Err(ResolutionError::FanOutDimension {
                    reference: dimension.field.to_string(),
                    base: joins.base.clone(),
                }
                .into());
            }
        }

        let mut builder = Builder {
            joins,
            deferred: Vec::new(),
            branches: Vec::new(),
        };
        let mut where_filters = Vec::new();
        for filter in &request.filters {
            if filter.post_aggregate || filter.target == FilterTarget::Metric {
                continue;
            }
            if aggregating && joins.fans_out(&filter.field.table) {
                builder.deferred.push(filter.clone());
            } else {
                where_filters.push(filter.clone());
            }
        }

        let mut columns: Vec<RootColumn> = request
            .dimensions
            .iter()
            .cloned()
            .map(RootColumn::Dimension)
            .collect();
        let mut ratios = Vec::new();
        for selected in &request.metrics {
            let measure = self.measure(&selected.field, &mut builder)?;
            let column = RootColumn::Metric {
                alias: selected.alias.clone(),
                measure,
            };
            if matches!(column, RootColumn::Metric { measure: Measure::Ratio { .. }, .. }) {
                ratios.push(column);
            } else {
                columns.push(column);
            }
        }
        columns.extend(ratios);

        let mut having = Vec::new();
        for filter in request.filters.iter().filter(|f| f.post_aggregate) {
            let measure = match filter.target {
                FilterTarget::Metric => Some(self.measure(&filter.field, &mut builder)?),
                FilterTarget::Dimension(_) => None,
            };
            having.push(HavingFilter {
                filter: filter.clone(),
                measure,
            });
        }

        let semi_joins = builder.semi_joins();
        let outer_joins = if aggregating {
            outer_joins(request, joins, &columns, &having, &where_filters, &builder, &semi_joins)
        } else {
            joins.joins.iter().map(|j| j.step.clone()).collect()
        };

        debug!(
            base = %joins.base,
            outer = ?outer_joins.iter().map(|j| j.to_table.as_str()).collect::<Vec<_>>(),
            branches = ?builder.branches.iter().map(|b| b.alias.as_str()).collect::<Vec<_>>(),
            semi_joins = semi_joins.len(),
            "planned aggregation"
        );

        Ok(AggregationPlan {
            base: joins.base.clone(),
            outer_joins,
            branches: builder.branches,
            columns,
            where_filters,
            semi_joins,
            having,
        })
    }

    fn metric(&self, field: &FieldRef) -> Result<&'a Metric> {
        Ok(self
            .registry
            .get_metric(&field.table, &field.field)
            .ok_or_else(|| ModelError::UnknownField(field.to_string()))?)
    }

    fn measure(&self, field: &FieldRef, builder: &mut Builder<'_>) -> Result<Measure> {
        let metric = self.metric(field)?;
        match &metric.kind {
            MetricKind::Ratio {
                numerator,
                denominator,
                on_zero,
            } => {
                if *on_zero == ZeroPolicy::Error {
                    return Err(RenderError::DivisionByZeroPolicyConflict {
                        reference: field.to_string(),
                        policy: on_zero.as_str().to_string(),
                    }
                    .into());
                }
                Ok(Measure::Ratio {
                    metric: field.clone(),
                    numerator: Box::new(self.measure(numerator, builder)?),
                    denominator: Box::new(self.measure(denominator, builder)?),
                    on_zero: *on_zero,
                })
            }
            MetricKind::Aggregate { agg, expr, filters } => {
                let joins = builder.joins;
                let path = joins.path_to(&metric.table);
                let Some(hop) = path.iter().position(|s| s.cardinality.fans_out()) else {
                    return Ok(Measure::Direct(field.clone()));
                };
                if *agg == Aggregation::CountDistinct {
                    return Err(RenderError::UnsupportedAggregation {
                        reference: field.to_string(),
                        aggregation: "count_distinct".into(),
                        reason: format!(
                            "distinct counts cannot be re-aggregated across the fan-out join {} -> {}",
                            path[hop].from_table, path[hop].to_table
                        ),
                    }
                    .into());
                }

                let mut row_filters = Vec::new();
                for filter in filters {
                    let filter = self.metric_row_filter(metric, filter)?;
                    if !row_filters.contains(&filter) {
                        row_filters.push(filter);
                    }
                }
                let branch = builder.branch_for(&path, hop, &metric.table, row_filters);
                let measure = BranchMeasure {
                    metric: field.clone(),
                    agg: *agg,
                    expr: expr.clone(),
                };
                let measures = &mut builder.branches[branch].measures;
                if !measures.iter().any(|m| m.metric == measure.metric) {
                    measures.push(measure);
                }
                Ok(Measure::Branch {
                    branch,
                    metric: field.clone(),
                })
            }
        }
    }

    /// A metric's own filter, in the same shape as a query filter
    fn metric_row_filter(&self, metric: &Metric, filter: &MetricFilter) -> Result<Filter> {
        let dimension = self
            .registry
            .get_dimension(&metric.table, &filter.field)
            .ok_or_else(|| ModelError::UnknownField(format!("{}.{}", metric.table, filter.field)))?;
        Ok(Filter {
            field: dimension.reference(),
            grain: None,
            target: FilterTarget::Dimension(dimension.data_type()),
            op: filter.op,
            operand: filter.operand.clone(),
            post_aggregate: false,
        })
    }
}

impl Builder<'_> {
    /// Extra steps needed to reach `target` from the rows below `path[hop]`,
    /// or `None` when `target` is not below that hop or the route fans out
    fn route_below(&self, path: &[&JoinStep], hop: usize, target: &str) -> Option<Vec<JoinStep>> {
        let route = self.joins.path_to(target);
        if route.len() <= hop || route[hop].to_table != path[hop].to_table {
            return None;
        }
        let split = divergence(path, &route);
        let extra = &route[split..];
        if extra.iter().any(|s| s.cardinality.fans_out()) {
            return None;
        }
        Some(extra.iter().map(|s| (*s).clone()).collect())
    }

    /// Find or create the branch for `source` with the given own filters
    fn branch_for(
        &mut self,
        path: &[&JoinStep],
        hop: usize,
        source: &str,
        mut filters: Vec<Filter>,
    ) -> usize {
        let mut joins: Vec<JoinStep> = path[hop + 1..].iter().map(|s| (*s).clone()).collect();
        for filter in &self.deferred {
            if let Some(extra) = self.route_below(path, hop, &filter.field.table) {
                for step in extra {
                    if !joins.contains(&step) {
                        joins.push(step);
                    }
                }
                if !filters.contains(filter) {
                    filters.push(filter.clone());
                }
            }
        }

        if let Some(existing) = self
            .branches
            .iter()
            .position(|b| b.source == source && same_filters(&b.filters, &filters))
        {
            return existing;
        }

        joins.sort_by_key(|s| self.joins.position(&s.to_table));
        let step = path[hop];
        let alias = self.branch_alias(source);
        self.branches.push(AggregationBranch {
            alias,
            source: source.to_string(),
            anchor: step.from_table.clone(),
            head: step.to_table.clone(),
            keys: step.keys.clone(),
            join_kind: step.join_kind,
            joins,
            filters,
            measures: Vec::new(),
        });
        self.branches.len() - 1
    }

    fn branch_alias(&self, source: &str) -> String {
        let taken = |alias: &str| {
            alias == self.joins.base
                || self.joins.get(alias).is_some()
                || self.branches.iter().any(|b| b.alias == alias)
        };
        let mut alias = format!("{source}_agg");
        let mut n = 2;
        while taken(&alias) {
            alias = format!("{source}_agg_{n}");
            n += 1;
        }
        alias
    }

    /// Semi-joins restricting the outer rows by every deferred filter, one
    /// per filtered table
    ///
    /// Filters pushed into a branch are included too, so direct metrics
    /// see the same anchor rows as the branch.
    fn semi_joins(&self) -> Vec<SemiJoin> {
        let mut semi_joins: Vec<(String, SemiJoin)> = Vec::new();
        for filter in &self.deferred {
            let table = &filter.field.table;
            if let Some((_, existing)) = semi_joins.iter_mut().find(|(t, _)| t == table) {
                existing.filters.push(filter.clone());
                continue;
            }
            let path = self.joins.path_to(table);
            let Some(hop) = path.iter().position(|s| s.cardinality.fans_out()) else {
                continue;
            };
            let step = path[hop];
            semi_joins.push((
                table.clone(),
                SemiJoin {
                    anchor: step.from_table.clone(),
                    head: step.to_table.clone(),
                    keys: step.keys.clone(),
                    joins: path[hop + 1..].iter().map(|s| (*s).clone()).collect(),
                    filters: vec![filter.clone()],
                },
            ));
        }
        semi_joins.into_iter().map(|(_, s)| s).collect()
    }
}

/// Outer-query joins of an aggregating query: every table on the way to a
/// dimension, a direct metric, a row filter, or an anchor
fn outer_joins(
    request: &QueryRequest,
    joins: &JoinPlan,
    columns: &[RootColumn],
    having: &[HavingFilter],
    where_filters: &[Filter],
    builder: &Builder<'_>,
    semi_joins: &[SemiJoin],
) -> Vec<JoinStep> {
    let mut wanted: BTreeSet<&str> = BTreeSet::new();
    wanted.extend(request.dimensions.iter().map(|d| d.field.table.as_str()));
    wanted.extend(where_filters.iter().map(|f| f.field.table.as_str()));
    wanted.extend(builder.branches.iter().map(|b| b.anchor.as_str()));
    wanted.extend(semi_joins.iter().map(|s| s.anchor.as_str()));

    let mut direct: Vec<&FieldRef> = Vec::new();
    for column in columns {
        if let RootColumn::Metric { measure, .. } = column {
            collect_direct(measure, &mut direct);
        }
    }
    for measure in having.iter().filter_map(|h| h.measure.as_ref()) {
        collect_direct(measure, &mut direct);
    }
    wanted.extend(direct.iter().map(|f| f.table.as_str()));

    let mut tables: BTreeSet<&str> = BTreeSet::new();
    for table in wanted {
        tables.extend(joins.path_to(table).iter().map(|s| s.to_table.as_str()));
    }

    joins
        .joins
        .iter()
        .filter(|j| tables.contains(j.table()))
        .map(|j| j.step.clone())
        .collect()
}

fn collect_direct<'m>(measure: &'m Measure, out: &mut Vec<&'m FieldRef>) {
    match measure {
        Measure::Direct(field) => out.push(field),
        Measure::Branch { .. } => {}
        Measure::Ratio {
            numerator,
            denominator,
            ..
        } => {
            collect_direct(numerator, out);
            collect_direct(denominator, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        Dimension, FilterOp, Grain, JoinGraphResolver, Literal, Operand, Relationship, Table,
    };
    use crate::error::SemqlError;
    use crate::query::{QueryValidator, RawFilter, SemanticQuery};
    use serde_json::json;

    fn create_test_registry() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        for name in ["customers", "orders", "order_lines", "products"] {
            registry
                .register_table(Table::new(name, format!("shop.{name}")).with_primary_key("id"))
                .unwrap();
        }
        registry.register_dimension(Dimension::string("customers", "country")).unwrap();
        registry.register_dimension(Dimension::string("orders", "status")).unwrap();
        registry
            .register_dimension(Dimension::date("orders", "order_date", [Grain::Month]))
            .unwrap();
        registry.register_dimension(Dimension::string("order_lines", "sku")).unwrap();
        registry.register_dimension(Dimension::string("products", "category")).unwrap();

        registry.register_metric(Metric::sum("orders", "revenue", "amount")).unwrap();
        registry.register_metric(Metric::count("orders", "order_count")).unwrap();
        registry
            .register_metric(Metric::sum("order_lines", "line_amount", "amount"))
            .unwrap();
        registry
            .register_metric(Metric::sum("order_lines", "quantity", "qty"))
            .unwrap();
        registry
            .register_metric(Metric::avg("order_lines", "avg_price", "price"))
            .unwrap();
        registry
            .register_metric(Metric::count_distinct("order_lines", "distinct_skus", "sku"))
            .unwrap();
        registry
            .register_metric(Metric::sum("order_lines", "gift_amount", "amount").with_filter(
                "sku",
                FilterOp::Eq,
                Operand::Single(Literal::string("GIFT")),
            ))
            .unwrap();
        registry
            .register_metric(Metric::ratio("orders", "avg_order_value", "revenue", "order_count"))
            .unwrap();

        registry
            .register_relationship(
                Relationship::many_to_one("orders", "customers").on("customer_id", "id"),
            )
            .unwrap();
        registry
            .register_relationship(
                Relationship::one_to_many("orders", "order_lines").on("id", "order_id"),
            )
            .unwrap();
        registry
            .register_relationship(
                Relationship::many_to_one("order_lines", "products").on("product_id", "id"),
            )
            .unwrap();
        registry
    }

    fn plan(registry: &ModelRegistry, query: SemanticQuery) -> Result<AggregationPlan> {
        let request = QueryValidator::new(registry).validate(&query)?;
        let joins = JoinGraphResolver::new(registry)
            .resolve(&request.base_table, &request.required_tables)?;
        AggregationPlanner::new(registry).plan(&request, &joins)
    }

    fn outer_tables(plan: &AggregationPlan) -> Vec<&str> {
        plan.outer_joins.iter().map(|j| j.to_table.as_str()).collect()
    }

    #[test]
    fn test_many_to_one_metrics_are_direct() {
        let registry = create_test_registry();
        let plan = plan(
            &registry,
            SemanticQuery::new()
                .with_dimensions(["customers.country"])
                .with_metrics(["orders.revenue", "orders.order_count"]),
        )
        .unwrap();

        assert_eq!(plan.base, "orders");
        assert!(plan.branches.is_empty());
        assert_eq!(outer_tables(&plan), vec!["customers"]);
        assert!(matches!(
            &plan.columns[1],
            RootColumn::Metric { measure: Measure::Direct(f), .. } if f.field == "revenue"
        ));
    }

    #[test]
    fn test_fan_out_metric_gets_branch() {
        let registry = create_test_registry();
        let plan = plan(
            &registry,
            SemanticQuery::new()
                .with_dimensions(["orders.status"])
                .with_metrics(["order_lines.line_amount"]),
        )
        .unwrap();

        assert_eq!(plan.base, "orders");
        assert_eq!(plan.branches.len(), 1);
        let branch = &plan.branches[0];
        assert_eq!(branch.alias, "order_lines_agg");
        assert_eq!(branch.anchor, "orders");
        assert_eq!(branch.head, "order_lines");
        assert_eq!(branch.keys, vec![("id".to_string(), "order_id".to_string())]);
        assert!(branch.joins.is_empty());
        // the fan-out table is only read inside the branch
        assert!(outer_tables(&plan).is_empty());
    }

    #[test]
    fn test_same_filters_share_one_branch() {
        let registry = create_test_registry();
        let plan = plan(
            &registry,
            SemanticQuery::new()
                .with_dimensions(["orders.status"])
                .with_metrics([
                    "orders.revenue",
                    "orders.order_count",
                    "order_lines.line_amount",
                    "order_lines.quantity",
                ]),
        )
        .unwrap();

        assert_eq!(plan.branches.len(), 1);
        assert_eq!(plan.branches[0].measures.len(), 2);
    }

    #[test]
    fn test_different_filters_split_branches() {
        let registry = create_test_registry();
        let plan = plan(
            &registry,
            SemanticQuery::new()
                .with_dimensions(["orders.status"])
                .with_metrics([
                    "orders.revenue",
                    "orders.order_count",
                    "order_lines.line_amount",
                    "order_lines.gift_amount",
                ]),
        )
        .unwrap();

        assert_eq!(plan.branches.len(), 2);
        assert_eq!(plan.branches[1].alias, "order_lines_agg_2");
        assert_eq!(plan.branches[1].filters.len(), 1);
        assert!(plan.branches[0].filters.is_empty());
    }

    #[test]
    fn test_fan_out_filter_pushed_into_branch() {
        let registry = create_test_registry();
        let plan = plan(
            &registry,
            SemanticQuery::new()
                .with_dimensions(["orders.status"])
                .with_metrics(["order_lines.line_amount"])
                .with_filter(RawFilter::new("products.category", FilterOp::Eq, json!("toys"))),
        )
        .unwrap();

        let branch = &plan.branches[0];
        assert_eq!(branch.filters.len(), 1);
        assert_eq!(branch.joins.len(), 1);
        assert_eq!(branch.joins[0].to_table, "products");
        assert!(plan.where_filters.is_empty());
        // the outer rows are restricted the same way
        assert_eq!(plan.semi_joins.len(), 1);
        assert_eq!(plan.semi_joins[0].head, "order_lines");
        assert_eq!(plan.semi_joins[0].joins[0].to_table, "products");
        assert!(outer_tables(&plan).is_empty());
    }

    #[test]
    fn test_uncovered_fan_out_filter_becomes_semi_join() {
        let registry = create_test_registry();
        let plan = plan(
            &registry,
            SemanticQuery::new()
                .with_metrics(["orders.revenue"])
                .with_filter(RawFilter::new("order_lines.sku", FilterOp::In, json!(["A", "B"]))),
        )
        .unwrap();

        assert!(plan.branches.is_empty());
        assert_eq!(plan.semi_joins.len(), 1);
        assert_eq!(plan.semi_joins[0].anchor, "orders");
        assert_eq!(plan.semi_joins[0].head, "order_lines");
        assert!(outer_tables(&plan).is_empty());
    }

    #[test]
    fn test_fan_out_dimension_rejected() {
        let registry = create_test_registry();
        let err = plan(
            &registry,
            SemanticQuery::new()
                .with_dimensions(["order_lines.sku"])
                .with_metrics(["orders.revenue", "orders.order_count"]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "ResolutionError:FanOutDimension");

        // without metrics every table joins directly
        let plan = plan(
            &registry,
            SemanticQuery::new().with_dimensions(["orders.status", "order_lines.sku"]),
        )
        .unwrap();
        assert_eq!(outer_tables(&plan), vec!["order_lines"]);
    }

    #[test]
    fn test_count_distinct_across_fan_out() {
        let registry = create_test_registry();
        let err = plan(
            &registry,
            SemanticQuery::new()
                .with_dimensions(["orders.status"])
                .with_metrics(["order_lines.distinct_skus"]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SemqlError::Render(RenderError::UnsupportedAggregation { .. })
        ));
    }

    #[test]
    fn test_zero_policy_error_rejected() {
        let mut registry = create_test_registry();
        registry
            .register_metric(
                Metric::ratio("orders", "strict_aov", "revenue", "order_count")
                    .with_zero_policy(ZeroPolicy::Error),
            )
            .unwrap();
        let err = plan(&registry, SemanticQuery::new().with_metrics(["orders.strict_aov"]))
            .unwrap_err();
        assert_eq!(err.kind(), "RenderError:DivisionByZeroPolicyConflict");
    }

    #[test]
    fn test_ratios_after_aggregates() {
        let registry = create_test_registry();
        let plan = plan(
            &registry,
            SemanticQuery::new()
                .with_dimensions(["orders.status"])
                .with_metrics(["orders.avg_order_value", "orders.revenue"]),
        )
        .unwrap();

        let names: Vec<&str> = plan
            .columns
            .iter()
            .map(|c| match c {
                RootColumn::Dimension(d) => d.alias.as_str(),
                RootColumn::Metric { alias, .. } => alias.as_str(),
            })
            .collect();
        assert_eq!(names, vec!["status", "revenue", "avg_order_value"]);
    }

    #[test]
    fn test_metric_filter_goes_to_having() {
        let registry = create_test_registry();
        let plan = plan(
            &registry,
            SemanticQuery::new()
                .with_dimensions(["orders.status"])
                .with_metrics(["orders.revenue"])
                .with_filter(RawFilter::new("order_lines.quantity", FilterOp::Gt, json!(10))),
        )
        .unwrap();

        assert_eq!(plan.having.len(), 1);
        assert!(matches!(
            plan.having[0].measure,
            Some(Measure::Branch { branch: 0, .. })
        ));
        assert_eq!(plan.branches.len(), 1);
    }

    #[test]
    fn test_many_to_many_is_fan_out() {
        let mut registry = create_test_registry();
        registry
            .register_table(Table::new("campaigns", "shop.campaigns").with_primary_key("code"))
            .unwrap();
        registry
            .register_metric(Metric::sum("campaigns", "spend", "cost"))
            .unwrap();
        registry
            .register_relationship(
                Relationship::many_to_many("orders", "campaigns")
                    .on("campaign_code", "code")
                    .with_join_kind(JoinKind::Inner),
            )
            .unwrap();

        let plan = plan(
            &registry,
            SemanticQuery::new()
                .with_dimensions(["orders.status"])
                .with_metrics(["orders.revenue", "campaigns.spend"]),
        )
        .unwrap();

        assert_eq!(plan.base, "orders");
        assert_eq!(plan.branches.len(), 1);
        let branch = &plan.branches[0];
        assert_eq!(branch.alias, "campaigns_agg");
        assert_eq!(branch.anchor, "orders");
        assert_eq!(branch.head, "campaigns");
        assert_eq!(branch.join_kind, JoinKind::Inner);
        assert_eq!(
            branch.keys,
            vec![("campaign_code".to_string(), "code".to_string())]
        );
        assert!(outer_tables(&plan).is_empty());
    }
}
