//! SQL generator: compiles semantic queries to SQL
//!
//! Runs the whole pipeline for one query: validation, join resolution,
//! aggregation planning, statement building, and rendering.

use serde::Serialize;
use tracing::{debug, trace};

use crate::config::CompileOptions;
use crate::core::{
    Aggregation, DataType, Dimension, FilterOp, Grain, JoinGraphResolver, JoinStep, Literal,
    MetricFilter, MetricKind, ModelRegistry, Operand, ZeroPolicy,
};
use crate::error::{ModelError, RenderError, Result};
use crate::query::{Filter, QueryRequest, QueryValidator, SemanticQuery, SortDirection};

use super::dialect::{is_bare_name, quote_identifier};
use super::planner::{
    key_column, AggregationBranch, AggregationPlan, AggregationPlanner, Measure, RootColumn,
    SemiJoin,
};
use super::render::render;
use super::statement::{
    CompareOp, Expr, Join, OrderItem, Predicate, SelectItem, SelectStatement, TableFactor,
};

/// Name and type of one result column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

/// SQL text plus the columns it returns, in select order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub columns: Vec<OutputColumn>,
}

/// SQL generator for semantic queries
pub struct SqlGenerator<'a> {
    registry: &'a ModelRegistry,
    options: CompileOptions,
}

impl<'a> SqlGenerator<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Self {
            registry,
            options: CompileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Generate SQL from a semantic query
    pub fn generate(&self, query: &SemanticQuery) -> Result<String> {
        Ok(self.compile(query)?.sql)
    }

    /// Generate SQL together with its output column descriptors
    pub fn compile(&self, query: &SemanticQuery) -> Result<CompiledQuery> {
        let request = QueryValidator::new(self.registry).validate(query)?;
        let joins = JoinGraphResolver::new(self.registry)
            .with_max_frontier(self.options.max_join_frontier)
            .resolve(&request.base_table, &request.required_tables)?;
        let plan = AggregationPlanner::new(self.registry).plan(&request, &joins)?;

        let statement = self.build_statement(&request, &plan)?;
        let sql = render(&statement);
        debug!(
            base = %plan.base,
            branches = plan.branches.len(),
            columns = plan.columns.len(),
            "compiled query"
        );
        trace!(sql = %sql, "rendered sql");

        let columns = plan
            .columns
            .iter()
            .map(|column| match column {
                RootColumn::Dimension(d) => OutputColumn {
                    name: d.alias.clone(),
                    data_type: d.data_type,
                },
                RootColumn::Metric { alias, .. } => OutputColumn {
                    name: alias.clone(),
                    data_type: DataType::Number,
                },
            })
            .collect();

        Ok(CompiledQuery { sql, columns })
    }

    /// Build the outer statement for a plan
    pub fn build_statement(
        &self,
        request: &QueryRequest,
        plan: &AggregationPlan,
    ) -> Result<SelectStatement> {
        let mut statement = SelectStatement::new(self.table_factor(&plan.base)?);

        for step in &plan.outer_joins {
            statement.joins.push(self.join(step)?);
        }
        for branch in &plan.branches {
            statement.joins.push(Join {
                kind: branch.join_kind,
                relation: TableFactor::Derived {
                    query: Box::new(self.branch_statement(branch)?),
                    alias: branch.alias.clone(),
                },
                on: branch
                    .keys
                    .iter()
                    .enumerate()
                    .map(|(i, (anchor_col, _))| {
                        (
                            Expr::column(&branch.anchor, anchor_col),
                            Expr::column(&branch.alias, key_column(i)),
                        )
                    })
                    .collect(),
            });
        }

        for column in &plan.columns {
            match column {
                RootColumn::Dimension(d) => {
                    let expr = self.dimension_expr(&d.field.table, &d.field.field, d.grain)?;
                    statement.group_by.push(expr.clone());
                    statement.projection.push(SelectItem::new(expr, &d.alias));
                }
                RootColumn::Metric { alias, measure } => {
                    let expr = self.measure_expr(measure, plan)?;
                    statement.projection.push(SelectItem::new(expr, alias));
                }
            }
        }

        for filter in &plan.where_filters {
            statement.selection.push(self.filter_predicate(filter)?);
        }
        for semi_join in &plan.semi_joins {
            statement
                .selection
                .push(Predicate::Exists(Box::new(self.semi_join_statement(semi_join)?)));
        }

        for having in &plan.having {
            let predicate = match &having.measure {
                Some(measure) => operand_predicate(
                    self.measure_expr(measure, plan)?,
                    having.filter.op,
                    &having.filter.operand,
                ),
                None => self.filter_predicate(&having.filter)?,
            };
            statement.having.push(predicate);
        }

        statement.order_by = request
            .order_by
            .iter()
            .map(|o| OrderItem {
                expr: Expr::Alias(o.alias.clone()),
                descending: o.direction == SortDirection::Desc,
            })
            .collect();
        statement.limit = request.limit;

        Ok(statement)
    }

    fn table_factor(&self, table: &str) -> Result<TableFactor> {
        let definition = self
            .registry
            .get_table(table)
            .ok_or_else(|| ModelError::UnknownTable(table.to_string()))?;
        Ok(TableFactor::Table {
            source: definition.source.clone(),
            alias: definition.name.clone(),
        })
    }

    fn join(&self, step: &JoinStep) -> Result<Join> {
        Ok(Join {
            kind: step.join_kind,
            relation: self.table_factor(&step.to_table)?,
            on: step
                .keys
                .iter()
                .map(|(from, to)| {
                    (
                        Expr::column(&step.from_table, from),
                        Expr::column(&step.to_table, to),
                    )
                })
                .collect(),
        })
    }

    fn dimension(&self, table: &str, name: &str) -> Result<&'a Dimension> {
        Ok(self
            .registry
            .get_dimension(table, name)
            .ok_or_else(|| ModelError::UnknownField(format!("{table}.{name}")))?)
    }

    fn dimension_expr(&self, table: &str, name: &str, grain: Option<Grain>) -> Result<Expr> {
        let dimension = self.dimension(table, name)?;
        let expr = model_expr(table, &dimension.expr);
        Ok(match grain {
            Some(grain) => Expr::Truncate {
                expr: Box::new(expr),
                grain,
                data_type: dimension.data_type(),
            },
            None => expr,
        })
    }

    fn filter_predicate(&self, filter: &Filter) -> Result<Predicate> {
        let expr = self.dimension_expr(&filter.field.table, &filter.field.field, filter.grain)?;
        Ok(operand_predicate(expr, filter.op, &filter.operand))
    }

    /// `agg(expr)` over rows of `table`, where `root` is the FROM table of
    /// the statement the aggregate lands in
    fn aggregate_expr(
        &self,
        table: &str,
        agg: Aggregation,
        expr: &str,
        filters: &[MetricFilter],
        root: &str,
    ) -> Result<Expr> {
        let mut value = if expr.trim() == "*" {
            // COUNT(*) over a joined table would count unmatched base rows
            match self.registry.get_table(table) {
                Some(t) if table != root && !t.primary_key.is_empty() => {
                    Expr::column(table, &t.primary_key[0])
                }
                _ => Expr::Star,
            }
        } else {
            model_expr(table, expr)
        };

        if !filters.is_empty() {
            let mut conditions = Vec::with_capacity(filters.len());
            for filter in filters {
                let column = self.dimension_expr(table, &filter.field, None)?;
                conditions.push(operand_predicate(column, filter.op, &filter.operand));
            }
            let condition = match conditions.len() {
                1 => conditions.remove(0),
                _ => Predicate::And(conditions),
            };
            let then = match value {
                Expr::Star => Expr::Integer(1),
                other => other,
            };
            value = Expr::Case {
                condition: Box::new(condition),
                then: Box::new(then),
            };
        }

        Ok(match agg {
            Aggregation::Sum => Expr::function("SUM", vec![value]),
            Aggregation::Count => Expr::function("COUNT", vec![value]),
            Aggregation::CountDistinct => Expr::distinct_function("COUNT", value),
            Aggregation::Avg => Expr::function("AVG", vec![value]),
            Aggregation::Min => Expr::function("MIN", vec![value]),
            Aggregation::Max => Expr::function("MAX", vec![value]),
        })
    }

    fn measure_expr(&self, measure: &Measure, plan: &AggregationPlan) -> Result<Expr> {
        match measure {
            Measure::Direct(field) => {
                let metric = self
                    .registry
                    .get_metric(&field.table, &field.field)
                    .ok_or_else(|| ModelError::UnknownField(field.to_string()))?;
                let MetricKind::Aggregate { agg, expr, filters } = &metric.kind else {
                    return Err(ModelError::InvalidDefinition {
                        reference: field.to_string(),
                        reason: "ratio metrics are not aggregated directly".into(),
                    }
                    .into());
                };
                self.aggregate_expr(&field.table, *agg, expr, filters, &plan.base)
            }
            Measure::Branch { branch, metric } => {
                let branch = &plan.branches[*branch];
                let measure = branch
                    .measures
                    .iter()
                    .find(|m| &m.metric == metric)
                    .ok_or_else(|| ModelError::UnknownField(metric.to_string()))?;
                let column = |name: String| Expr::column(&branch.alias, name);
                Ok(match measure.agg {
                    Aggregation::Sum => Expr::function("SUM", vec![column(metric.field.clone())]),
                    Aggregation::Count => Expr::function(
                        "COALESCE",
                        vec![
                            Expr::function("SUM", vec![column(metric.field.clone())]),
                            Expr::Literal(Literal::int(0)),
                        ],
                    ),
                    Aggregation::Min => Expr::function("MIN", vec![column(metric.field.clone())]),
                    Aggregation::Max => Expr::function("MAX", vec![column(metric.field.clone())]),
                    Aggregation::Avg => Expr::safe_divide(
                        Expr::function("SUM", vec![column(measure.sum_column())]),
                        Expr::function("SUM", vec![column(measure.count_column())]),
                    ),
                    Aggregation::CountDistinct => {
                        return Err(RenderError::UnsupportedAggregation {
                            reference: metric.to_string(),
                            aggregation: "count_distinct".into(),
                            reason: format!(
                                "cannot be re-aggregated from branch '{}'",
                                branch.alias
                            ),
                        }
                        .into())
                    }
                })
            }
            Measure::Ratio {
                numerator,
                denominator,
                on_zero,
                ..
            } => {
                let ratio = Expr::safe_divide(
                    self.measure_expr(numerator, plan)?,
                    self.measure_expr(denominator, plan)?,
                );
                Ok(match on_zero {
                    ZeroPolicy::Zero => {
                        Expr::function("COALESCE", vec![ratio, Expr::Literal(Literal::int(0))])
                    }
                    ZeroPolicy::Null | ZeroPolicy::Error => ratio,
                })
            }
        }
    }

    fn branch_statement(&self, branch: &AggregationBranch) -> Result<SelectStatement> {
        let mut statement = SelectStatement::new(self.table_factor(&branch.head)?);
        for step in &branch.joins {
            statement.joins.push(self.join(step)?);
        }

        for (i, (_, head_col)) in branch.keys.iter().enumerate() {
            let key = Expr::column(&branch.head, head_col);
            statement.group_by.push(key.clone());
            statement.projection.push(SelectItem::new(key, key_column(i)));
        }

        for measure in &branch.measures {
            let source = &measure.metric.table;
            match measure.agg {
                Aggregation::Avg => {
                    let head = &branch.head;
                    let sum =
                        self.aggregate_expr(source, Aggregation::Sum, &measure.expr, &[], head)?;
                    let count =
                        self.aggregate_expr(source, Aggregation::Count, &measure.expr, &[], head)?;
                    statement.projection.push(SelectItem::new(sum, measure.sum_column()));
                    statement.projection.push(SelectItem::new(count, measure.count_column()));
                }
                agg => {
                    let expr = self.aggregate_expr(source, agg, &measure.expr, &[], &branch.head)?;
                    statement
                        .projection
                        .push(SelectItem::new(expr, measure.metric.field.clone()));
                }
            }
        }

        for filter in &branch.filters {
            statement.selection.push(self.filter_predicate(filter)?);
        }
        Ok(statement)
    }

    fn semi_join_statement(&self, semi_join: &SemiJoin) -> Result<SelectStatement> {
        let mut statement = SelectStatement::new(self.table_factor(&semi_join.head)?);
        statement.projection.push(SelectItem::unnamed(Expr::Integer(1)));
        for step in &semi_join.joins {
            statement.joins.push(self.join(step)?);
        }
        for (anchor_col, head_col) in &semi_join.keys {
            statement.selection.push(Predicate::Compare {
                expr: Expr::column(&semi_join.head, head_col),
                op: CompareOp::Eq,
                value: Expr::column(&semi_join.anchor, anchor_col),
            });
        }
        for filter in &semi_join.filters {
            statement.selection.push(self.filter_predicate(filter)?);
        }
        Ok(statement)
    }
}

/// A model expression read against `table`
///
/// Plain column names are qualified with the table alias; anything else is
/// inserted as written, with `{table}` replaced by the alias.
fn model_expr(table: &str, expr: &str) -> Expr {
    let expr = expr.trim();
    if expr == "*" {
        Expr::Star
    } else if is_bare_name(expr) {
        Expr::column(table, expr)
    } else {
        Expr::Raw(expr.replace("{table}", &quote_identifier(table)))
    }
}

fn operand_predicate(expr: Expr, op: FilterOp, operand: &Operand) -> Predicate {
    match (op, operand) {
        (FilterOp::DateRange, Operand::Range(low, high)) => Predicate::And(vec![
            Predicate::Compare {
                expr: expr.clone(),
                op: CompareOp::GtEq,
                value: Expr::Literal(low.clone()),
            },
            Predicate::Compare {
                expr,
                op: CompareOp::Lt,
                value: Expr::Literal(high.clone()),
            },
        ]),
        (_, Operand::Range(low, high)) => Predicate::Between {
            expr,
            low: low.clone(),
            high: high.clone(),
        },
        (_, Operand::List(values)) => Predicate::In {
            expr,
            values: values.clone(),
        },
        (op, Operand::Single(value)) => Predicate::Compare {
            expr,
            op: match op {
                FilterOp::Gt => CompareOp::Gt,
                FilterOp::Lt => CompareOp::Lt,
                _ => CompareOp::Eq,
            },
            value: Expr::Literal(value.clone()),
        },
    }
}
