//! Query requests and their validation

mod request;
mod validate;

pub use request::{
    Filter, FilterTarget, OrderBy, QueryRequest, RawFilter, RawOrderBy, SelectedDimension,
    SelectedMetric, SemanticQuery, SortDirection,
};
pub use validate::QueryValidator;
