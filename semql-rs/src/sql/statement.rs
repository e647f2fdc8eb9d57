//! Statement representation rendered by [`super::render`]
//!
//! The planner and generator only ever build these values; SQL text is
//! produced in one final pass.

use crate::core::{DataType, Grain, JoinKind, Literal};

/// Scalar expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `table.column`, both parts quoted as needed
    Column { table: String, column: String },
    /// Reference to an output alias (ORDER BY)
    Alias(String),
    /// Modeler-authored SQL fragment, inserted verbatim
    Raw(String),
    Literal(Literal),
    /// Bare integer, e.g. the `1` in `SELECT 1`
    Integer(i64),
    Star,
    Function {
        name: &'static str,
        args: Vec<Expr>,
        distinct: bool,
    },
    /// Grain truncation of a date/timestamp expression
    Truncate {
        expr: Box<Expr>,
        grain: Grain,
        data_type: DataType,
    },
    /// `CASE WHEN condition THEN then END`
    Case {
        condition: Box<Predicate>,
        then: Box<Expr>,
    },
    Divide(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn function(name: &'static str, args: Vec<Expr>) -> Self {
        Expr::Function {
            name,
            args,
            distinct: false,
        }
    }

    pub fn distinct_function(name: &'static str, arg: Expr) -> Self {
        Expr::Function {
            name,
            args: vec![arg],
            distinct: true,
        }
    }

    /// `numerator / NULLIF(denominator, 0)`
    pub fn safe_divide(numerator: Expr, denominator: Expr) -> Self {
        Expr::Divide(
            Box::new(numerator),
            Box::new(Expr::function(
                "NULLIF",
                vec![denominator, Expr::Literal(Literal::int(0))],
            )),
        )
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    GtEq,
    Lt,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::Lt => "<",
        }
    }
}

/// Boolean condition tree
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        expr: Expr,
        op: CompareOp,
        value: Expr,
    },
    In {
        expr: Expr,
        values: Vec<Literal>,
    },
    Between {
        expr: Expr,
        low: Literal,
        high: Literal,
    },
    And(Vec<Predicate>),
    Exists(Box<SelectStatement>),
}

/// A select-list entry
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectItem {
    pub fn new(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }

    pub fn unnamed(expr: Expr) -> Self {
        Self { expr, alias: None }
    }
}

/// Something a FROM or JOIN reads from
#[derive(Debug, Clone, PartialEq)]
pub enum TableFactor {
    Table { source: String, alias: String },
    Derived {
        query: Box<SelectStatement>,
        alias: String,
    },
}

/// `JOIN relation ON left = right AND ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub relation: TableFactor,
    pub on: Vec<(Expr, Expr)>,
}

/// ORDER BY entry
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub descending: bool,
}

/// A complete SELECT
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub projection: Vec<SelectItem>,
    pub from: TableFactor,
    pub joins: Vec<Join>,
    /// ANDed together in WHERE
    pub selection: Vec<Predicate>,
    pub group_by: Vec<Expr>,
    /// ANDed together in HAVING
    pub having: Vec<Predicate>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
}

impl SelectStatement {
    pub fn new(from: TableFactor) -> Self {
        Self {
            projection: Vec::new(),
            from,
            joins: Vec::new(),
            selection: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }
}
