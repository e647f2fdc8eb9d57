//! Runs generated SQL against an in-memory SQLite fixture.
//!
//! SQLite accepts the backtick quoting, NULLIF/COALESCE, and derived-table
//! joins the generator emits, so plain-column models without grains execute
//! unchanged.

use rusqlite::Connection;
use semql::config::{load_from_string, SemanticModel};
use semql::core::FilterOp;
use semql::{RawFilter, RawOrderBy, SemanticQuery};
use serde_json::json;

const MODEL: &str = r#"
tables:
  - name: orders
    source: orders
    primary_key: id
  - name: customers
    source: customers
    primary_key: id
  - name: order_lines
    source: order_lines
    primary_key: id
dimensions:
  - table: orders
    name: status
    type: string
  - table: customers
    name: country
    type: string
  - table: order_lines
    name: sku
    type: string
metrics:
  - table: orders
    name: revenue
    agg: sum
    expr: amount
  - table: orders
    name: refunds
    agg: sum
    expr: refund
  - table: orders
    name: refund_share
    ratio_of: [refunds, revenue]
  - table: orders
    name: order_count
    agg: count
  - table: order_lines
    name: line_amount
    agg: sum
    expr: amount
  - table: order_lines
    name: line_count
    agg: count
relationships:
  - left_table: orders
    right_table: customers
    on: [[customer_id, id]]
    cardinality: many_to_one
  - left_table: orders
    right_table: order_lines
    on: [[id, order_id]]
    cardinality: one_to_many
"#;

fn model() -> SemanticModel {
    load_from_string(MODEL).unwrap()
}

fn fixture() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "
        CREATE TABLE customers (id INTEGER PRIMARY KEY, country TEXT);
        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER,
            status TEXT,
            amount REAL,
            refund REAL
        );
        CREATE TABLE order_lines (id INTEGER PRIMARY KEY, order_id INTEGER, sku TEXT, amount REAL);

        INSERT INTO customers VALUES (1, 'DE'), (2, 'FR');
        INSERT INTO orders VALUES
            (1, 1, 'completed', 100.0, 25.0),
            (2, 2, 'void', 0.0, 0.0),
            (3, 2, 'completed', 100.0, 25.0);
        INSERT INTO order_lines VALUES (1, 1, 'A', 10.0), (2, 1, 'B', 15.0), (3, 3, 'B', 5.0);
        ",
    )
    .unwrap();
    conn
}

/// Rows of `(label, value)` pairs
fn run(sql: &str) -> Vec<(String, Option<f64>)> {
    let conn = fixture();
    let mut stmt = conn.prepare(sql).unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<f64>>(1)?)))
        .unwrap();
    let rows: Vec<_> = rows.map(|r| r.unwrap()).collect();
    rows
}

#[test]
fn test_fan_out_sum_is_not_duplicated() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["orders.status"])
        .with_metrics(["orders.revenue", "order_lines.line_amount", "orders.order_count"])
        .with_order_by(RawOrderBy::asc("status"));
    let sql = model.generator().generate(&query).unwrap();

    let conn = fixture();
    let mut stmt = conn.prepare(&sql).unwrap();
    let rows: Vec<(String, f64, Option<f64>, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    // 10 + 15 + 5 = 30, and revenue stays 200 rather than 300
    assert_eq!(
        rows,
        vec![
            ("completed".to_string(), 200.0, Some(30.0), 2),
            ("void".to_string(), 0.0, None, 1),
        ]
    );
}

#[test]
fn test_naive_join_would_double_count() {
    // the hazard the branch avoids
    let rows = run(
        "SELECT orders.status, SUM(orders.amount) FROM orders
         JOIN order_lines ON orders.id = order_lines.order_id GROUP BY orders.status",
    );
    assert_eq!(rows, vec![("completed".to_string(), Some(300.0))]);
}

#[test]
fn test_zero_denominator_ratio_is_null() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["orders.status"])
        .with_metrics(["orders.refund_share"])
        .with_order_by(RawOrderBy::asc("status"));
    let sql = model.generator().generate(&query).unwrap();

    assert_eq!(
        run(&sql),
        vec![
            ("completed".to_string(), Some(0.25)),
            ("void".to_string(), None),
        ]
    );
}

#[test]
fn test_many_to_one_dimension_with_branch() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["customers.country"])
        .with_metrics(["order_lines.line_amount", "orders.revenue"])
        .with_order_by(RawOrderBy::desc("line_amount"))
        .with_limit(1);
    let sql = model.generator().generate(&query).unwrap();

    assert_eq!(run(&sql), vec![("DE".to_string(), Some(25.0))]);
}

#[test]
fn test_fan_out_filter_restricts_aggregated_rows() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["orders.status"])
        .with_metrics(["order_lines.line_amount", "orders.order_count"])
        .with_filter(RawFilter::new("order_lines.sku", FilterOp::Eq, json!("A")))
        .with_order_by(RawOrderBy::asc("status"));
    let sql = model.generator().generate(&query).unwrap();

    // orders without an 'A' line drop out entirely
    assert_eq!(run(&sql), vec![("completed".to_string(), Some(10.0))]);
}

#[test]
fn test_fan_out_filter_is_independent_of_selection() {
    let model = model();
    let filter = RawFilter::new("order_lines.sku", FilterOp::Eq, json!("A"));
    let alone = SemanticQuery::new()
        .with_dimensions(["orders.status"])
        .with_metrics(["orders.revenue"])
        .with_filter(filter.clone());
    let with_branch = SemanticQuery::new()
        .with_dimensions(["orders.status"])
        .with_metrics(["orders.revenue", "order_lines.line_amount"])
        .with_filter(filter);

    let alone = run(&model.generator().generate(&alone).unwrap());
    let with_branch = run(&model.generator().generate(&with_branch).unwrap());

    // only order 1 has an 'A' line
    assert_eq!(alone, vec![("completed".to_string(), Some(100.0))]);
    assert_eq!(with_branch, alone);
}

#[test]
fn test_semi_join_filter_on_uncovered_table() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["orders.status"])
        .with_metrics(["orders.revenue"])
        .with_filter(RawFilter::new("order_lines.sku", FilterOp::In, json!(["B"])));
    let sql = model.generator().generate(&query).unwrap();

    assert!(sql.contains("EXISTS ("));
    assert_eq!(run(&sql), vec![("completed".to_string(), Some(200.0))]);
}

#[test]
fn test_post_aggregate_metric_filter() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["orders.status"])
        .with_metrics(["orders.revenue"])
        .with_filter(RawFilter::new("order_lines.line_count", FilterOp::Gt, json!(1)));
    let sql = model.generator().generate(&query).unwrap();

    // 'completed' has three lines, 'void' none
    assert_eq!(run(&sql), vec![("completed".to_string(), Some(200.0))]);
}
