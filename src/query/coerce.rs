//! Typed values for filter clauses.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::filter::Operator;

static DATE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("valid date regex"));

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A coerced filter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// Epoch milliseconds
    Timestamp(i64),
    Text(String),
    List(Vec<FilterValue>),
}

impl FilterValue {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Integer(n) | Self::Timestamp(n) => Value::from(*n),
            Self::Float(f) => Value::from(*f),
            Self::Bool(b) => Value::Bool(*b),
            Self::Text(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Coerce a raw value for the given operator.
///
/// Patterns stay verbatim, list operators split on `,` and coerce each
/// element, everything else goes through [`coerce_scalar`].
pub fn coerce(operator: Operator, raw: &str) -> FilterValue {
    if operator.is_pattern() {
        return FilterValue::Text(raw.to_string());
    }

    if operator.is_list() {
        return FilterValue::List(split_list(raw).map(coerce_scalar).collect());
    }

    coerce_scalar(raw)
}

/// Number, then boolean, then ISO-like date, then plain text.
pub fn coerce_scalar(raw: &str) -> FilterValue {
    if let Some(number) = parse_number(raw) {
        return number;
    }

    if raw.eq_ignore_ascii_case("true") {
        return FilterValue::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return FilterValue::Bool(false);
    }

    if DATE_PREFIX.is_match(raw) {
        if let Some(ms) = parse_timestamp(raw) {
            return FilterValue::Timestamp(ms);
        }
    }

    FilterValue::Text(raw.to_string())
}

pub(crate) fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_number(raw: &str) -> Option<FilterValue> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // f64 parsing also accepts `inf` and `nan`, which are not numbers here
    let value: f64 = trimmed.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        Some(FilterValue::Integer(value as i64))
    } else {
        Some(FilterValue::Float(value))
    }
}

/// Parse an ISO-8601-ish date string into epoch milliseconds (UTC when no
/// offset is given).
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.timestamp_millis());
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Render epoch milliseconds the way Nightscout clients expect `dateString`.
pub fn format_timestamp(ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}
