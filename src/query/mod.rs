//! Caller filter compilation.
//!
//! `find[field][$op]=value` query strings are parsed into clauses, values are
//! coerced to numbers, booleans, timestamps or text, and the result is
//! wrapped into a predicate set scoped to a single tenant.

pub mod coerce;
pub mod compiler;
pub mod filter;

pub use coerce::{FilterValue, coerce, coerce_scalar, format_timestamp, parse_timestamp};
pub use compiler::{
    CompiledQuery, DEFAULT_RESULT_COUNT, DEFAULT_WINDOW_HOURS, DeletionScope, MAX_RESULT_COUNT,
    Predicate, SortDirection, SortKey, compile, compile_at, compile_deletion, requested_count,
};
pub use filter::{
    DropReason, DroppedFragment, FilterClause, Operator, ParsedFilter, is_valid_field,
    parse_filter,
};
