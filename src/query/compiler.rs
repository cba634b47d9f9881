//! Compilation of caller filters into tenant-scoped predicate sets.
//!
//! The compiler is total: whatever the caller sends, the output is a usable
//! predicate set whose first clause restricts results to the tenant.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::coerce::{FilterValue, coerce};
use super::filter::{
    DropReason, DroppedFragment, FilterClause, Operator, is_valid_field, parse_filter,
};
use crate::db::schema::OWNER_FIELD;
use crate::types::TenantId;

/// Hard cap on returned records, whatever the caller asks for.
pub const MAX_RESULT_COUNT: u32 = 1000;
/// Limit used when the caller gives no usable `count`.
pub const DEFAULT_RESULT_COUNT: u32 = 10;
/// Width of the implicit time window.
pub const DEFAULT_WINDOW_HOURS: i64 = 48;

static LEADING_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([+-]?)(\d+)").expect("valid count regex"));

/// A typed clause ready for the record store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    pub value: FilterValue,
}

impl Predicate {
    pub fn new(field: impl Into<String>, operator: Operator, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    fn tenant(tenant: &TenantId) -> Self {
        Self::new(
            OWNER_FIELD,
            Operator::Eq,
            FilterValue::Text(tenant.as_str().to_string()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }
}

/// Result of [`compile`]: predicates (tenant clause first), ordering and limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub predicates: Vec<Predicate>,
    pub order: Vec<SortKey>,
    pub limit: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<DroppedFragment>,
}

impl CompiledQuery {
    /// The injected tenant clause.
    pub fn tenant_clause(&self) -> &Predicate {
        &self.predicates[0]
    }

    /// Append a server-side clause (route parameters and the like).
    ///
    /// Clauses on the tenant field are refused so the tenant clause stays
    /// the only one.
    pub fn and(&mut self, predicate: Predicate) -> bool {
        if predicate.field == OWNER_FIELD {
            return false;
        }
        self.predicates.push(predicate);
        true
    }
}

/// Predicates for a bulk delete. No default window is applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletionScope {
    pub predicates: Vec<Predicate>,
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<DroppedFragment>,
}

/// Read the `count` companion parameter from its leading integer, so
/// `5.5` and `20abc` count as 5 and 20. Missing, non-numeric and
/// non-positive values all yield `None`.
pub fn requested_count(raw: &str) -> Option<u32> {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    let (_, value) = url::form_urlencoded::parse(raw.as_bytes()).find(|(key, _)| key == "count")?;

    let caps = LEADING_INTEGER.captures(&value)?;
    let digits = caps[2].trim_start_matches('0');
    if digits.is_empty() || &caps[1] == "-" {
        return None;
    }

    Some(digits.parse::<u32>().unwrap_or(u32::MAX))
}

fn effective_limit(requested: Option<u32>) -> u32 {
    requested
        .filter(|count| *count > 0)
        .unwrap_or(DEFAULT_RESULT_COUNT)
        .min(MAX_RESULT_COUNT)
}

/// Compile a raw query string for `tenant` against the current time.
pub fn compile(
    raw: &str,
    tenant: &TenantId,
    requested: Option<u32>,
    timestamp_field: &str,
) -> CompiledQuery {
    compile_at(raw, tenant, requested, timestamp_field, Utc::now())
}

/// Same as [`compile`] with an explicit clock, so the default window is
/// reproducible.
pub fn compile_at(
    raw: &str,
    tenant: &TenantId,
    requested: Option<u32>,
    timestamp_field: &str,
    now: DateTime<Utc>,
) -> CompiledQuery {
    let parsed = parse_filter(raw);
    let mut dropped = parsed.dropped;

    let mut predicates = vec![Predicate::tenant(tenant)];
    let caller = caller_predicates(parsed.clauses, &mut dropped);
    let has_window = caller.iter().any(|p| p.field == timestamp_field);
    predicates.extend(caller);

    if !has_window {
        let since = now - Duration::hours(DEFAULT_WINDOW_HOURS);
        predicates.push(Predicate::new(
            timestamp_field,
            Operator::Gte,
            FilterValue::Timestamp(since.timestamp_millis()),
        ));
    }

    let mut order = parsed
        .sort
        .as_deref()
        .map(|sort| parse_sort(sort, &mut dropped))
        .unwrap_or_default();
    if order.is_empty() {
        order.push(SortKey::descending(timestamp_field));
    }

    let limit = effective_limit(requested);

    debug!(
        "Compiled query for tenant {}: {} predicates, limit {}, {} dropped",
        tenant,
        predicates.len(),
        limit,
        dropped.len()
    );

    CompiledQuery {
        predicates,
        order,
        limit,
        dropped,
    }
}

/// Compile the scope of a bulk delete: tenant clause plus caller clauses.
pub fn compile_deletion(raw: &str, tenant: &TenantId, requested: Option<u32>) -> DeletionScope {
    let parsed = parse_filter(raw);
    let mut dropped = parsed.dropped;

    let mut predicates = vec![Predicate::tenant(tenant)];
    predicates.extend(caller_predicates(parsed.clauses, &mut dropped));

    DeletionScope {
        predicates,
        limit: requested.map(|count| effective_limit(Some(count))),
        dropped,
    }
}

fn caller_predicates(
    clauses: Vec<FilterClause>,
    dropped: &mut Vec<DroppedFragment>,
) -> Vec<Predicate> {
    let mut predicates: Vec<Predicate> = Vec::new();

    for clause in clauses {
        let fragment = clause.to_string();

        if clause.field == OWNER_FIELD {
            dropped.push(DroppedFragment::new(fragment, DropReason::TenantField));
            continue;
        }

        if clause.operator == Operator::Regex {
            if let Err(e) = regex::Regex::new(&clause.raw_value) {
                dropped.push(DroppedFragment::new(
                    fragment,
                    DropReason::InvalidPattern(e.to_string()),
                ));
                continue;
            }
        }

        let value = coerce(clause.operator, &clause.raw_value);

        if let FilterValue::List(items) = value {
            if items.is_empty() {
                dropped.push(DroppedFragment::new(fragment, DropReason::EmptyValue));
                continue;
            }

            let existing = predicates
                .iter_mut()
                .find(|p| p.field == clause.field && p.operator == clause.operator);
            match existing {
                Some(Predicate {
                    value: FilterValue::List(current),
                    ..
                }) => current.extend(items),
                _ => predicates.push(Predicate::new(
                    clause.field,
                    clause.operator,
                    FilterValue::List(items),
                )),
            }
            continue;
        }

        predicates.push(Predicate::new(clause.field, clause.operator, value));
    }

    predicates
}

fn parse_sort(raw: &str, dropped: &mut Vec<DroppedFragment>) -> Vec<SortKey> {
    let mut keys = Vec::new();

    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let key = match part.strip_prefix('-') {
            Some(field) => SortKey::descending(field),
            None => SortKey::ascending(part.strip_prefix('+').unwrap_or(part)),
        };

        if !is_valid_field(&key.field) || key.field == OWNER_FIELD {
            dropped.push(DroppedFragment::new(
                format!("sort={}", part),
                DropReason::InvalidSortKey,
            ));
            continue;
        }

        keys.push(key);
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn owner(id: &str) -> Predicate {
        Predicate::new(OWNER_FIELD, Operator::Eq, FilterValue::Text(id.to_string()))
    }

    fn window() -> Predicate {
        Predicate::new(
            "date",
            Operator::Gte,
            FilterValue::Timestamp(1_700_000_000_000 - 48 * 3_600_000),
        )
    }

    #[test]
    fn test_explicit_date_clause_suppresses_window() {
        let compiled = compile_at(
            "find[date][$gte]=1700000000000",
            &TenantId::new("42"),
            Some(5),
            "date",
            now(),
        );

        assert_eq!(
            compiled.predicates,
            vec![
                owner("42"),
                Predicate::new("date", Operator::Gte, FilterValue::Integer(1_700_000_000_000)),
            ]
        );
        assert_eq!(compiled.limit, 5);
        assert_eq!(compiled.order, vec![SortKey::descending("date")]);
    }

    #[test]
    fn test_empty_filter_gets_window_and_defaults() {
        let compiled = compile_at("", &TenantId::new("7"), None, "date", now());

        assert_eq!(compiled.predicates, vec![owner("7"), window()]);
        assert_eq!(compiled.limit, DEFAULT_RESULT_COUNT);
        assert_eq!(compiled.order, vec![SortKey::descending("date")]);
        assert!(compiled.dropped.is_empty());
    }

    #[test]
    fn test_range_on_numeric_field() {
        let compiled = compile_at(
            "find[sgv][$gte]=70&find[sgv][$lte]=180",
            &TenantId::new("1"),
            None,
            "date",
            now(),
        );

        assert_eq!(
            compiled.predicates,
            vec![
                owner("1"),
                Predicate::new("sgv", Operator::Gte, FilterValue::Integer(70)),
                Predicate::new("sgv", Operator::Lte, FilterValue::Integer(180)),
                window(),
            ]
        );
    }

    #[test]
    fn test_caller_cannot_override_tenant() {
        let compiled = compile_at(
            "find[owner]=999&find[owner][$ne]=1",
            &TenantId::new("1"),
            None,
            "date",
            now(),
        );

        assert_eq!(compiled.predicates, vec![owner("1"), window()]);
        assert_eq!(compiled.tenant_clause(), &owner("1"));
        assert_eq!(compiled.dropped.len(), 2);
        assert!(
            compiled
                .dropped
                .iter()
                .all(|d| d.reason == DropReason::TenantField)
        );
    }

    #[test]
    fn test_count_clamped_and_defaulted() {
        let tenant = TenantId::new("1");
        assert_eq!(compile_at("", &tenant, Some(5000), "date", now()).limit, 1000);
        assert_eq!(compile_at("", &tenant, Some(0), "date", now()).limit, 10);
        assert_eq!(compile_at("", &tenant, Some(1000), "date", now()).limit, 1000);
    }

    #[test]
    fn test_requested_count_parsing() {
        assert_eq!(requested_count("count=25&find[type]=sgv"), Some(25));
        assert_eq!(requested_count("?count=5000"), Some(5000));
        assert_eq!(requested_count("count=abc"), None);
        assert_eq!(requested_count("count=-4"), None);
        assert_eq!(requested_count("count=0"), None);
        assert_eq!(requested_count("count=5.5"), Some(5));
        assert_eq!(requested_count("count=%2012abc"), Some(12));
        assert_eq!(requested_count("count=-0.5"), None);
        assert_eq!(requested_count("count=99999999999"), Some(u32::MAX));
        assert_eq!(requested_count("find[type]=sgv"), None);
    }

    #[test]
    fn test_sort_directive() {
        let compiled = compile_at(
            "sort=-sgv,date,owner,bad.field",
            &TenantId::new("1"),
            None,
            "date",
            now(),
        );

        assert_eq!(
            compiled.order,
            vec![SortKey::descending("sgv"), SortKey::ascending("date")]
        );
        assert_eq!(compiled.dropped.len(), 2);
    }

    #[test]
    fn test_invalid_regex_dropped() {
        let compiled = compile_at(
            "find[device][$regex]=(unclosed&find[device][$like]=xdrip",
            &TenantId::new("1"),
            None,
            "date",
            now(),
        );

        assert_eq!(
            compiled.predicates[1],
            Predicate::new("device", Operator::Like, FilterValue::Text("xdrip".to_string()))
        );
        assert!(matches!(
            compiled.dropped[0].reason,
            DropReason::InvalidPattern(_)
        ));
    }

    #[test]
    fn test_list_fragments_merge() {
        let compiled = compile_at(
            "find[type][$in][]=sgv&find[type][$in][]=mbg,cal",
            &TenantId::new("1"),
            None,
            "date",
            now(),
        );

        assert_eq!(
            compiled.predicates[1],
            Predicate::new(
                "type",
                Operator::In,
                FilterValue::List(vec![
                    FilterValue::Text("sgv".to_string()),
                    FilterValue::Text("mbg".to_string()),
                    FilterValue::Text("cal".to_string()),
                ])
            )
        );
        assert_eq!(compiled.predicates.len(), 3);
    }

    #[test]
    fn test_dropped_fragments_leave_rest_intact() {
        let compiled = compile_at(
            "find[sgv][$where]=1&find[type]=sgv&garbage",
            &TenantId::new("1"),
            None,
            "date",
            now(),
        );

        assert_eq!(
            compiled.predicates,
            vec![
                owner("1"),
                Predicate::new("type", Operator::Eq, FilterValue::Text("sgv".to_string())),
                window(),
            ]
        );
        assert_eq!(compiled.dropped.len(), 1);
    }

    #[test]
    fn test_alternate_timestamp_field() {
        let compiled = compile_at("", &TenantId::new("1"), None, "created_at", now());
        assert_eq!(compiled.predicates[1].field, "created_at");
        assert_eq!(compiled.order, vec![SortKey::descending("created_at")]);
    }

    #[test]
    fn test_server_clause_cannot_target_tenant() {
        let mut compiled = compile_at("", &TenantId::new("1"), None, "date", now());
        assert!(!compiled.and(owner("2")));
        assert!(compiled.and(Predicate::new(
            "type",
            Operator::Eq,
            FilterValue::Text("mbg".to_string())
        )));
        assert_eq!(compiled.predicates.len(), 3);
    }

    #[test]
    fn test_deletion_scope() {
        let scope = compile_deletion("find[type]=sgv", &TenantId::new("1"), None);
        assert_eq!(
            scope.predicates,
            vec![
                owner("1"),
                Predicate::new("type", Operator::Eq, FilterValue::Text("sgv".to_string())),
            ]
        );
        assert_eq!(scope.limit, None);

        let capped = compile_deletion("", &TenantId::new("1"), Some(9999));
        assert_eq!(capped.predicates, vec![owner("1")]);
        assert_eq!(capped.limit, Some(1000));
    }
}
