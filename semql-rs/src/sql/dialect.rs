//! BigQuery dialect details: identifier quoting, literals, truncation
//!
//! Identifiers stay bare when they match `[A-Za-z_][A-Za-z0-9_]*` and are
//! not reserved; anything else is wrapped in backticks.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::{DataType, Grain, Literal};

static SAFE_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// BigQuery reserved keywords
static RESERVED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "ALL", "AND", "ANY", "ARRAY", "AS", "ASC", "ASSERT_ROWS_MODIFIED", "AT", "BETWEEN", "BY",
        "CASE", "CAST", "COLLATE", "CONTAINS", "CREATE", "CROSS", "CUBE", "CURRENT", "DEFAULT",
        "DEFINE", "DESC", "DISTINCT", "ELSE", "END", "ENUM", "ESCAPE", "EXCEPT", "EXCLUDE",
        "EXISTS", "EXTRACT", "FALSE", "FETCH", "FOLLOWING", "FOR", "FROM", "FULL", "GROUP",
        "GROUPING", "GROUPS", "HASH", "HAVING", "IF", "IGNORE", "IN", "INNER", "INTERSECT",
        "INTERVAL", "INTO", "IS", "JOIN", "LATERAL", "LEFT", "LIKE", "LIMIT", "LOOKUP", "MERGE",
        "NATURAL", "NEW", "NO", "NOT", "NULL", "NULLS", "OF", "ON", "OR", "ORDER", "OUTER", "OVER",
        "PARTITION", "PRECEDING", "PROTO", "QUALIFY", "RANGE", "RECURSIVE", "RESPECT", "RIGHT",
        "ROLLUP", "ROWS", "SELECT", "SET", "SOME", "STRUCT", "TABLESAMPLE", "THEN", "TO", "TREAT",
        "TRUE", "UNBOUNDED", "UNION", "UNNEST", "USING", "WHEN", "WHERE", "WINDOW", "WITH",
        "WITHIN",
    ]
    .into_iter()
    .collect()
});

/// Whether `ident` can appear unquoted
pub fn is_safe_identifier(ident: &str) -> bool {
    SAFE_IDENTIFIER.is_match(ident) && !RESERVED.contains(ident.to_ascii_uppercase().as_str())
}

/// Whether a model expression is a plain column name
pub fn is_bare_name(expr: &str) -> bool {
    SAFE_IDENTIFIER.is_match(expr)
}

/// Quote an identifier when needed
pub fn quote_identifier(ident: &str) -> String {
    if is_safe_identifier(ident) {
        ident.to_string()
    } else {
        format!("`{}`", ident.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Quote a table source path such as `project-1.sales.orders`
///
/// A path whose segments are all safe stays bare; otherwise the whole path
/// is quoted as one identifier, which BigQuery accepts for table paths.
pub fn quote_source(source: &str) -> String {
    let source = source.trim();
    if source.split('.').all(is_safe_identifier) {
        source.to_string()
    } else {
        format!("`{}`", source.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Quote a string literal, escaping quotes and control characters
pub fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Render a typed literal
pub fn render_literal(literal: &Literal) -> String {
    match literal {
        Literal::String(s) => quote_string(s),
        Literal::Number(n) => n.clone(),
        Literal::Boolean(true) => "TRUE".to_string(),
        Literal::Boolean(false) => "FALSE".to_string(),
        Literal::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
        Literal::Timestamp(ts) => format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.f")),
    }
}

/// Truncation function for a temporal type
pub fn truncate_function(data_type: DataType) -> &'static str {
    match data_type {
        DataType::Timestamp => "TIMESTAMP_TRUNC",
        _ => "DATE_TRUNC",
    }
}

/// `DATE_TRUNC(expr, MONTH)` / `TIMESTAMP_TRUNC(expr, MONTH)`
pub fn truncate(expr: &str, grain: Grain, data_type: DataType) -> String {
    format!("{}({}, {})", truncate_function(data_type), expr, grain.as_sql())
}
