//! End-to-end compilation of a YAML model: load, compile, inspect the SQL.

use semql::config::{load_from_string, load_request_from_str, SemanticModel};
use semql::{DataType, OutputColumn, RawFilter, RawOrderBy, SemanticQuery};
use semql::core::FilterOp;
use serde_json::json;

const MODEL: &str = r#"
tables:
  - name: customers
    source: analytics.customers
    primary_key: id
  - name: orders
    source: analytics.orders
    primary_key: id
  - name: order_lines
    source: analytics.order_lines
    primary_key: id
  - name: weather
    source: my-project.ext.weather

dimensions:
  - table: customers
    name: country
    type: string
  - table: orders
    name: status
    type: string
  - table: orders
    name: group
    type: string
    expr: sales_group
  - table: orders
    name: created_at
    type: timestamp
    grains: [day, week, month]
  - table: orders
    name: is_gift
    type: boolean
  - table: order_lines
    name: sku
    type: string
  - table: weather
    name: city
    type: string

metrics:
  - table: orders
    name: revenue
    agg: sum
    expr: amount
  - table: orders
    name: order_count
    agg: count
  - table: orders
    name: completed_count
    agg: count
    filters:
      - field: status
        op: eq
        value: completed
  - table: orders
    name: completion_rate
    numerator: completed_count
    denominator: order_count
  - table: order_lines
    name: line_amount
    agg: sum
    expr: amount
  - table: order_lines
    name: avg_price
    agg: avg
    expr: "{table}.price * (1 - {table}.discount)"
  - table: weather
    name: rainfall
    agg: sum
    expr: mm

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

fn sql(model: &SemanticModel, query: &SemanticQuery) -> String {
    let sql = model.generator().generate(query).unwrap();
    println!("Generated SQL:\n{sql}");
    sql
}

#[test]
fn test_fan_out_metric_is_pre_aggregated() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["orders.status"])
        .with_metrics(["orders.revenue", "order_lines.line_amount"]);
    let sql = sql(&model, &query);

    assert!(sql.contains("SUM(orders.amount) AS revenue"));
    assert!(sql.contains("FROM analytics.order_lines AS order_lines\n  GROUP BY order_lines.order_id\n) AS order_lines_agg ON orders.id = order_lines_agg.key__0"));
    assert!(sql.contains("SUM(order_lines_agg.line_amount) AS line_amount"));
}

#[test]
fn test_multi_hop_fan_out_groups_by_first_hop_key() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["customers.country"])
        .with_metrics(["order_lines.line_amount"]);
    let sql = sql(&model, &query);

    assert!(sql.starts_with("SELECT\n  customers.country AS country,"));
    assert!(sql.contains("  FROM analytics.orders AS orders\n  LEFT JOIN analytics.order_lines AS order_lines ON orders.id = order_lines.order_id\n  GROUP BY orders.customer_id"));
    assert!(sql.contains(") AS order_lines_agg ON customers.id = order_lines_agg.key__0"));
}

#[test]
fn test_avg_across_fan_out_reaggregates_sum_and_count() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["orders.status"])
        .with_metrics(["orders.revenue", "order_lines.avg_price"]);
    let sql = sql(&model, &query);

    assert!(sql.contains("SUM(order_lines.price * (1 - order_lines.discount)) AS avg_price__sum"));
    assert!(sql.contains("COUNT(order_lines.price * (1 - order_lines.discount)) AS avg_price__count"));
    assert!(sql.contains(
        "SUM(order_lines_agg.avg_price__sum) / NULLIF(SUM(order_lines_agg.avg_price__count), 0) AS avg_price"
    ));
}

#[test]
fn test_grain_and_output_columns() {
    let model = model();
    let query = load_request_from_str(
        r#"{
            "dimensions": ["orders.created_at__week", "orders.is_gift"],
            "metrics": ["completion_rate"],
            "order_by": ["completion_rate desc"],
            "limit": 5
        }"#,
    )
    .unwrap();
    let compiled = model.generator().compile(&query).unwrap();

    assert!(compiled
        .sql
        .contains("GROUP BY TIMESTAMP_TRUNC(orders.created_at, WEEK), orders.is_gift"));
    assert!(compiled.sql.ends_with("ORDER BY completion_rate DESC\nLIMIT 5"));
    assert_eq!(
        compiled.columns,
        vec![
            OutputColumn {
                name: "created_at__week".into(),
                data_type: DataType::Timestamp
            },
            OutputColumn {
                name: "is_gift".into(),
                data_type: DataType::Boolean
            },
            OutputColumn {
                name: "completion_rate".into(),
                data_type: DataType::Number
            },
        ]
    );
}

#[test]
fn test_reserved_words_and_sources_are_quoted() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["orders.group"])
        .with_metrics(["orders.revenue"]);
    let sql = sql(&model, &query);
    assert!(sql.contains("orders.sales_group AS `group`"));

    let query = SemanticQuery::new().with_dimensions(["weather.city"]);
    let sql = self::sql(&model, &query);
    assert!(sql.contains("FROM `my-project.ext.weather` AS weather"));
}

#[test]
fn test_filters_render_typed_literals() {
    let model = model();
    let query = SemanticQuery::new()
        .with_metrics(["orders.revenue"])
        .with_filter(RawFilter::new("orders.is_gift", FilterOp::Eq, json!(true)))
        .with_filter(RawFilter::new(
            "orders.created_at",
            FilterOp::Between,
            json!(["2024-01-01", "2024-03-31T23:59:59"]),
        ))
        .with_filter(RawFilter::new(
            "customers.country",
            FilterOp::In,
            json!(["DE", "O'Neil"]),
        ));
    let sql = sql(&model, &query);

    assert!(sql.contains("WHERE orders.is_gift = TRUE"));
    assert!(sql.contains(
        "AND orders.created_at BETWEEN TIMESTAMP '2024-01-01 00:00:00' AND TIMESTAMP '2024-03-31 23:59:59'"
    ));
    assert!(sql.contains("AND customers.country IN ('DE', 'O\\'Neil')"));
}

#[test]
fn test_unreachable_table_fails_no_join_path() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["orders.status", "orders.created_at__month"])
        .with_metrics(["weather.rainfall"]);
    let err = model.generator().generate(&query).unwrap_err();

    assert_eq!(err.kind(), "ResolutionError:NoJoinPath");
    assert_eq!(err.reference().as_deref(), Some("orders->weather"));
}

#[test]
fn test_unsupported_grain_fails() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["orders.created_at__year"])
        .with_metrics(["orders.revenue"]);
    let err = model.generator().generate(&query).unwrap_err();

    assert_eq!(err.kind(), "ValidationError:InvalidDateGrain");
    assert_eq!(err.reference().as_deref(), Some("orders.created_at__year"));
}

#[test]
fn test_order_by_unselected_field_fails() {
    let model = model();
    let query = SemanticQuery::new()
        .with_metrics(["orders.revenue"])
        .with_order_by(RawOrderBy::desc("orders.order_count"));
    let err = model.generator().generate(&query).unwrap_err();
    assert_eq!(err.kind(), "ValidationError:UnknownOrderField");
}

#[test]
fn test_compilation_is_deterministic() {
    let model = model();
    let query = SemanticQuery::new()
        .with_dimensions(["customers.country", "orders.created_at__month"])
        .with_metrics(["orders.completion_rate", "order_lines.line_amount", "orders.revenue"])
        .with_filter(RawFilter::new("order_lines.sku", FilterOp::Eq, json!("A")))
        .with_filter(RawFilter::new("revenue", FilterOp::Gt, json!(10)))
        .with_order_by(RawOrderBy::desc("revenue"))
        .with_limit(100);

    let first = sql(&model, &query);
    for _ in 0..10 {
        assert_eq!(model.generator().generate(&query).unwrap(), first);
    }
    // a freshly loaded model compiles to the same text
    assert_eq!(sql(&self::model(), &query), first);
}
