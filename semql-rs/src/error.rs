//! Error types for semql
//!
//! One enum per pipeline stage, wrapped by [`SemqlError`]. Every variant
//! names the table or `table.field` it is about.

use thiserror::Error;

/// Errors raised while building the [`ModelRegistry`](crate::core::ModelRegistry).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Table '{0}' is already registered")]
    DuplicateTable(String),

    #[error("Field '{table}.{field}' is already registered")]
    DuplicateField { table: String, field: String },

    #[error("Table '{0}' is not registered")]
    UnknownTable(String),

    #[error("Field '{0}' does not exist")]
    UnknownField(String),

    #[error("Invalid relationship {left} -> {right}: {reason}")]
    BadRelationship {
        left: String,
        right: String,
        reason: String,
    },

    #[error("Invalid definition of '{reference}': {reason}")]
    InvalidDefinition { reference: String, reason: String },
}

/// Errors raised while validating a query request against the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown field '{reference}': {reason}")]
    UnknownField { reference: String, reason: String },

    #[error("Type mismatch on '{reference}': expected {expected}, got {found}")]
    TypeMismatch {
        reference: String,
        expected: String,
        found: String,
    },

    #[error("Grain '{grain}' is not supported by '{reference}' (supported: {supported})")]
    InvalidDateGrain {
        reference: String,
        grain: String,
        supported: String,
    },

    #[error("Query must select at least one dimension or metric")]
    EmptySelection,

    #[error("No single base table connects {tables}")]
    ConflictingBaseTable { tables: String },

    #[error("Invalid filter on '{reference}': {reason}")]
    InvalidFilter { reference: String, reason: String },

    #[error("'{0}' is selected more than once")]
    DuplicateSelection(String),

    #[error("Cannot order by '{0}': it is not part of the selection")]
    UnknownOrderField(String),
}

/// Errors raised while resolving join paths and planning aggregation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("No join path from '{from}' to '{to}'")]
    NoJoinPath { from: String, to: String },

    #[error("Ambiguous join between '{from}' and '{to}': {count} relationships qualify")]
    AmbiguousJoinPath {
        from: String,
        to: String,
        count: usize,
    },

    #[error("Join search from '{from}' exceeded {limit} candidate paths")]
    TooManyJoinCandidates { from: String, limit: usize },

    #[error("Dimension '{reference}' is reached through a fan-out join from '{base}' and would multiply metric values")]
    FanOutDimension { reference: String, base: String },
}

/// Errors raised while building the SQL statement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Aggregation {aggregation} of '{reference}' cannot be computed: {reason}")]
    UnsupportedAggregation {
        reference: String,
        aggregation: String,
        reason: String,
    },

    #[error("Ratio '{reference}' requests on_zero={policy}, but ratios always divide null-safely")]
    DivisionByZeroPolicyConflict { reference: String, policy: String },
}

/// Crate-level error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SemqlError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SemqlError {
    /// Tag of the form `Stage:Variant`, e.g. `ResolutionError:NoJoinPath`.
    pub fn kind(&self) -> &'static str {
        match self {
            SemqlError::Model(e) => match e {
                ModelError::DuplicateTable(_) => "ModelError:DuplicateTable",
                ModelError::DuplicateField { .. } => "ModelError:DuplicateField",
                ModelError::UnknownTable(_) => "ModelError:UnknownTable",
                ModelError::UnknownField(_) => "ModelError:UnknownField",
                ModelError::BadRelationship { .. } => "ModelError:BadRelationship",
                ModelError::InvalidDefinition { .. } => "ModelError:InvalidDefinition",
            },
            SemqlError::Validation(e) => match e {
                ValidationError::UnknownField { .. } => "ValidationError:UnknownField",
                ValidationError::TypeMismatch { .. } => "ValidationError:TypeMismatch",
                ValidationError::InvalidDateGrain { .. } => "ValidationError:InvalidDateGrain",
                ValidationError::EmptySelection => "ValidationError:EmptySelection",
                ValidationError::ConflictingBaseTable { .. } => {
                    "ValidationError:ConflictingBaseTable"
                }
                ValidationError::InvalidFilter { .. } => "ValidationError:InvalidFilter",
                ValidationError::DuplicateSelection(_) => "ValidationError:DuplicateSelection",
                ValidationError::UnknownOrderField(_) => "ValidationError:UnknownOrderField",
            },
            SemqlError::Resolution(e) => match e {
                ResolutionError::NoJoinPath { .. } => "ResolutionError:NoJoinPath",
                ResolutionError::AmbiguousJoinPath { .. } => "ResolutionError:AmbiguousJoinPath",
                ResolutionError::TooManyJoinCandidates { .. } => {
                    "ResolutionError:TooManyJoinCandidates"
                }
                ResolutionError::FanOutDimension { .. } => "ResolutionError:FanOutDimension",
            },
            SemqlError::Render(e) => match e {
                RenderError::UnsupportedAggregation { .. } => "RenderError:UnsupportedAggregation",
                RenderError::DivisionByZeroPolicyConflict { .. } => {
                    "RenderError:DivisionByZeroPolicyConflict"
                }
            },
            SemqlError::Config(_) => "ConfigError",
        }
    }

    /// The table, field, or table pair the error is about, if any.
    pub fn reference(&self) -> Option<String> {
        match self {
            SemqlError::Model(e) => Some(match e {
                ModelError::DuplicateTable(t) | ModelError::UnknownTable(t) => t.clone(),
                ModelError::DuplicateField { table, field } => format!("{table}.{field}"),
                ModelError::UnknownField(r) => r.clone(),
                ModelError::BadRelationship { left, right, .. } => format!("{left}->{right}"),
                ModelError::InvalidDefinition { reference, .. } => reference.clone(),
            }),
            SemqlError::Validation(e) => match e {
                ValidationError::UnknownField { reference, .. }
                | ValidationError::TypeMismatch { reference, .. }
                | ValidationError::InvalidDateGrain { reference, .. }
                | ValidationError::InvalidFilter { reference, .. } => Some(reference.clone()),
                ValidationError::DuplicateSelection(r) | ValidationError::UnknownOrderField(r) => {
                    Some(r.clone())
                }
                ValidationError::ConflictingBaseTable { tables } => Some(tables.clone()),
                ValidationError::EmptySelection => None,
            },
            SemqlError::Resolution(e) => Some(match e {
                ResolutionError::NoJoinPath { from, to }
                | ResolutionError::AmbiguousJoinPath { from, to, .. } => format!("{from}->{to}"),
                ResolutionError::TooManyJoinCandidates { from, .. } => from.clone(),
                ResolutionError::FanOutDimension { reference, .. } => reference.clone(),
            }),
            SemqlError::Render(e) => Some(match e {
                RenderError::UnsupportedAggregation { reference, .. }
                | RenderError::DivisionByZeroPolicyConflict { reference, .. } => reference.clone(),
            }),
            SemqlError::Config(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SemqlError>;
