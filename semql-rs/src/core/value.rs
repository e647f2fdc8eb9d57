//! Typed filter operands
//!
//! Raw JSON operands are checked against the declared type of the field
//! they filter and turned into [`Literal`]s here, once, so nothing
//! downstream ever sees an untyped value.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::DataType;

/// Filter operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    #[serde(alias = "=", alias = "==")]
    Eq,
    In,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = "<")]
    Lt,
    Between,
    DateRange,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::In => "in",
            FilterOp::Gt => "gt",
            FilterOp::Lt => "lt",
            FilterOp::Between => "between",
            FilterOp::DateRange => "date_range",
        }
    }
}

/// A typed scalar value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    /// Numeric text exactly as supplied (`10`, `2.5`)
    Number(String),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Literal {
    pub fn string(value: impl Into<String>) -> Self {
        Literal::String(value.into())
    }

    pub fn int(value: i64) -> Self {
        Literal::Number(value.to_string())
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Literal::String(_) => DataType::String,
            Literal::Number(_) => DataType::Number,
            Literal::Boolean(_) => DataType::Boolean,
            Literal::Date(_) => DataType::Date,
            Literal::Timestamp(_) => DataType::Timestamp,
        }
    }
}

/// Operand of a filter, shaped by its operator
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Single(Literal),
    List(Vec<Literal>),
    Range(Literal, Literal),
}

impl Operand {
    pub fn literals(&self) -> Vec<&Literal> {
        match self {
            Operand::Single(v) => vec![v],
            Operand::List(values) => values.iter().collect(),
            Operand::Range(low, high) => vec![low, high],
        }
    }

    /// Promote date literals to midnight timestamps when the field is a timestamp
    pub fn coerce_to(&mut self, expected: DataType) {
        if expected != DataType::Timestamp {
            return;
        }
        let widen = |literal: &mut Literal| {
            if let Literal::Date(date) = *literal {
                *literal = Literal::Timestamp(date.and_time(NaiveTime::default()));
            }
        };
        match self {
            Operand::Single(value) => widen(value),
            Operand::List(values) => values.iter_mut().for_each(widen),
            Operand::Range(low, high) => {
                widen(low);
                widen(high);
            }
        }
    }
}

/// Why an operand does not fit its field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandError {
    TypeMismatch { expected: String, found: String },
    Invalid(String),
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Convert one JSON value to a literal of the expected type
pub fn literal_from_json(expected: DataType, value: &Value) -> Result<Literal, OperandError> {
    let mismatch = || OperandError::TypeMismatch {
        expected: expected.to_string(),
        found: json_type_name(value).to_string(),
    };

    match (expected, value) {
        (DataType::String, Value::String(s)) => Ok(Literal::String(s.clone())),
        (DataType::Number, Value::Number(n)) => Ok(Literal::Number(n.to_string())),
        (DataType::Boolean, Value::Bool(b)) => Ok(Literal::Boolean(*b)),
        (DataType::Date, Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Literal::Date)
            .map_err(|_| OperandError::TypeMismatch {
                expected: "date (YYYY-MM-DD)".into(),
                found: format!("'{s}'"),
            }),
        (DataType::Timestamp, Value::String(s)) => {
            parse_timestamp(s)
                .map(Literal::Timestamp)
                .ok_or_else(|| OperandError::TypeMismatch {
                    expected: "timestamp (RFC 3339 or YYYY-MM-DD[ HH:MM:SS])".into(),
                    found: format!("'{s}'"),
                })
        }
        _ => Err(mismatch()),
    }
}

fn check_operator(expected: DataType, op: FilterOp) -> Result<(), OperandError> {
    let allowed = match op {
        FilterOp::Eq | FilterOp::In => true,
        FilterOp::Gt | FilterOp::Lt | FilterOp::Between => expected != DataType::Boolean,
        FilterOp::DateRange => expected.is_temporal(),
    };
    if allowed {
        Ok(())
    } else {
        Err(OperandError::Invalid(format!(
            "operator '{}' does not apply to {} fields",
            op.as_str(),
            expected
        )))
    }
}

/// Convert a JSON operand to a typed [`Operand`] for `op` on a field of type `expected`
pub fn operand_from_json(
    expected: DataType,
    op: FilterOp,
    value: &Value,
) -> Result<Operand, OperandError> {
    check_operator(expected, op)?;

    match op {
        FilterOp::Eq | FilterOp::Gt | FilterOp::Lt => {
            Ok(Operand::Single(literal_from_json(expected, value)?))
        }
        FilterOp::In => {
            let Value::Array(items) = value else {
                return Err(OperandError::Invalid(format!(
                    "'in' expects a list, got {}",
                    json_type_name(value)
                )));
            };
            if items.is_empty() {
                return Err(OperandError::Invalid("'in' expects a non-empty list".into()));
            }
            let literals = items
                .iter()
                .map(|item| literal_from_json(expected, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Operand::List(literals))
        }
        FilterOp::Between | FilterOp::DateRange => match value {
            Value::Array(items) if items.len() == 2 => Ok(Operand::Range(
                literal_from_json(expected, &items[0])?,
                literal_from_json(expected, &items[1])?,
            )),
            _ => Err(OperandError::Invalid(format!(
                "'{}' expects exactly two values",
                op.as_str()
            ))),
        },
    }
}

/// Check an already-typed operand against a field type (model-level filters)
pub fn check_operand(
    expected: DataType,
    op: FilterOp,
    operand: &Operand,
) -> Result<(), OperandError> {
    check_operator(expected, op)?;

    let shape_ok = matches!(
        (op, operand),
        (FilterOp::Eq | FilterOp::Gt | FilterOp::Lt, Operand::Single(_))
            | (FilterOp::In, Operand::List(_))
            | (FilterOp::Between | FilterOp::DateRange, Operand::Range(..))
    );
    if !shape_ok {
        return Err(OperandError::Invalid(format!(
            "operand shape does not match operator '{}'",
            op.as_str()
        )));
    }
    if let Operand::List(values) = operand {
        if values.is_empty() {
            return Err(OperandError::Invalid("'in' expects a non-empty list".into()));
        }
    }

    for literal in operand.literals() {
        let found = literal.data_type();
        if found != expected {
            return Err(OperandError::TypeMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
    }
    Ok(())
}
