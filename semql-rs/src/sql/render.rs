//! Renders a [`SelectStatement`] to SQL text
//!
//! Rendering is a pure function of the statement: clause order, spacing and
//! indentation are fixed, so equal statements give byte-identical SQL.

use super::dialect::{quote_identifier, quote_source, render_literal, truncate};
use super::statement::{Expr, Join, OrderItem, Predicate, SelectStatement, TableFactor};

const INDENT: &str = "  ";

/// Render a statement as a standalone query
pub fn render(statement: &SelectStatement) -> String {
    render_statement(statement, 0)
}

fn pad(depth: usize) -> String {
    INDENT.repeat(depth)
}

fn render_statement(statement: &SelectStatement, depth: usize) -> String {
    let p = pad(depth);
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("{p}SELECT"));
    let items: Vec<String> = statement
        .projection
        .iter()
        .map(|item| {
            let expr = render_expr(&item.expr, depth + 1);
            match &item.alias {
                Some(alias) => format!("{p}{INDENT}{expr} AS {}", quote_identifier(alias)),
                None => format!("{p}{INDENT}{expr}"),
            }
        })
        .collect();
    lines.push(items.join(",\n"));

    lines.push(format!("{p}FROM {}", render_factor(&statement.from, depth)));
    for join in &statement.joins {
        lines.push(render_join(join, depth));
    }

    if !statement.selection.is_empty() {
        lines.push(format!(
            "{p}WHERE {}",
            render_conjunction(&statement.selection, depth)
        ));
    }

    if !statement.group_by.is_empty() {
        let keys: Vec<String> = statement
            .group_by
            .iter()
            .map(|e| render_expr(e, depth))
            .collect();
        lines.push(format!("{p}GROUP BY {}", keys.join(", ")));
    }

    if !statement.having.is_empty() {
        lines.push(format!(
            "{p}HAVING {}",
            render_conjunction(&statement.having, depth)
        ));
    }

    if !statement.order_by.is_empty() {
        let keys: Vec<String> = statement
            .order_by
            .iter()
            .map(|item| render_order_item(item, depth))
            .collect();
        lines.push(format!("{p}ORDER BY {}", keys.join(", ")));
    }

    if let Some(limit) = statement.limit {
        lines.push(format!("{p}LIMIT {limit}"));
    }

    lines.join("\n")
}

fn render_factor(factor: &TableFactor, depth: usize) -> String {
    match factor {
        TableFactor::Table { source, alias } => {
            format!("{} AS {}", quote_source(source), quote_identifier(alias))
        }
        TableFactor::Derived { query, alias } => format!(
            "(\n{}\n{}) AS {}",
            render_statement(query, depth + 1),
            pad(depth),
            quote_identifier(alias)
        ),
    }
}

fn render_join(join: &Join, depth: usize) -> String {
    let conditions: Vec<String> = join
        .on
        .iter()
        .map(|(left, right)| {
            format!("{} = {}", render_expr(left, depth), render_expr(right, depth))
        })
        .collect();
    format!(
        "{}{} {} ON {}",
        pad(depth),
        join.kind.as_sql(),
        render_factor(&join.relation, depth),
        conditions.join(" AND ")
    )
}

fn render_order_item(item: &OrderItem, depth: usize) -> String {
    let direction = if item.descending { "DESC" } else { "ASC" };
    format!("{} {direction}", render_expr(&item.expr, depth))
}

/// Top-level conjunction, one condition per line
fn render_conjunction(predicates: &[Predicate], depth: usize) -> String {
    let parts: Vec<String> = predicates
        .iter()
        .map(|p| render_predicate(p, depth))
        .collect();
    parts.join(&format!("\n{}{INDENT}AND ", pad(depth)))
}

fn render_predicate(predicate: &Predicate, depth: usize) -> String {
    match predicate {
        Predicate::Compare { expr, op, value } => format!(
            "{} {} {}",
            render_expr(expr, depth),
            op.as_sql(),
            render_expr(value, depth)
        ),
        Predicate::In { expr, values } => {
            let values: Vec<String> = values.iter().map(render_literal).collect();
            format!("{} IN ({})", render_expr(expr, depth), values.join(", "))
        }
        Predicate::Between { expr, low, high } => format!(
            "{} BETWEEN {} AND {}",
            render_expr(expr, depth),
            render_literal(low),
            render_literal(high)
        ),
        Predicate::And(parts) => {
            let parts: Vec<String> = parts
                .iter()
                .map(|p| match p {
                    Predicate::And(_) => format!("({})", render_predicate(p, depth)),
                    _ => render_predicate(p, depth),
                })
                .collect();
            parts.join(" AND ")
        }
        Predicate::Exists(query) => format!(
            "EXISTS (\n{}\n{}{INDENT})",
            render_statement(query, depth + 2),
            pad(depth)
        ),
    }
}

fn render_expr(expr: &Expr, depth: usize) -> String {
    match expr {
        Expr::Column { table, column } => {
            format!("{}.{}", quote_identifier(table), quote_identifier(column))
        }
        Expr::Alias(alias) => quote_identifier(alias),
        Expr::Raw(sql) => sql.clone(),
        Expr::Literal(literal) => render_literal(literal),
        Expr::Integer(value) => value.to_string(),
        Expr::Star => "*".to_string(),
        Expr::Function {
            name,
            args,
            distinct,
        } => {
            let args: Vec<String> = args.iter().map(|a| render_expr(a, depth)).collect();
            let prefix = if *distinct { "DISTINCT " } else { "" };
            format!("{name}({prefix}{})", args.join(", "))
        }
        Expr::Truncate {
            expr,
            grain,
            data_type,
        } => truncate(&render_expr(expr, depth), *grain, *data_type),
        Expr::Case { condition, then } => format!(
            "CASE WHEN {} THEN {} END",
            render_predicate(condition, depth),
            render_expr(then, depth)
        ),
        Expr::Divide(numerator, denominator) => format!(
            "{} / {}",
            render_operand(numerator, depth),
            render_operand(denominator, depth)
        ),
    }
}

/// Parenthesize nested arithmetic so precedence survives rendering
fn render_operand(expr: &Expr, depth: usize) -> String {
    match expr {
        Expr::Divide(..) | Expr::Raw(_) => format!("({})", render_expr(expr, depth)),
        _ => render_expr(expr, depth),
    }
}
