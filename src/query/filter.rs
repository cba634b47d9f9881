//! Parsing of `find[field][$op]=value` fragments out of a URL query string.
//!
//! Parsing never fails. Fragments that do not fit the grammar are returned
//! in [`ParsedFilter::dropped`] so the caller can log them.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

static FRAGMENT_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^find\[([^\[\]]+)\](?:\[([^\[\]]+)\])?(?:\[\])?$").expect("valid fragment regex")
});

static FIELD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid field regex"));

/// Comparison operator of a filter clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Gte,
    Gt,
    Lte,
    Lt,
    Ne,
    In,
    NotIn,
    Regex,
    Like,
}

impl Operator {
    /// Map a URL operator token (`$gte`, `$nin`, ...) to an operator.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "$gte" => Some(Self::Gte),
            "$gt" => Some(Self::Gt),
            "$lte" => Some(Self::Lte),
            "$lt" => Some(Self::Lt),
            "$ne" => Some(Self::Ne),
            "$in" => Some(Self::In),
            "$nin" => Some(Self::NotIn),
            "$regex" => Some(Self::Regex),
            "$like" => Some(Self::Like),
            _ => None,
        }
    }

    /// The URL token for this operator; `None` for plain equality.
    pub fn token(&self) -> Option<&'static str> {
        match self {
            Self::Eq => None,
            Self::Gte => Some("$gte"),
            Self::Gt => Some("$gt"),
            Self::Lte => Some("$lte"),
            Self::Lt => Some("$lt"),
            Self::Ne => Some("$ne"),
            Self::In => Some("$in"),
            Self::NotIn => Some("$nin"),
            Self::Regex => Some("$regex"),
            Self::Like => Some("$like"),
        }
    }

    /// Whether the value is a list of alternatives.
    pub fn is_list(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// Whether the value is a pattern kept verbatim.
    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Regex | Self::Like)
    }
}

/// One parsed `find[...]` fragment, before type coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterClause {
    pub field: String,
    pub operator: Operator,
    pub raw_value: String,
}

impl fmt::Display for FilterClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator.token() {
            Some(token) => write!(f, "find[{}][{}]={}", self.field, token, self.raw_value),
            None => write!(f, "find[{}]={}", self.field, self.raw_value),
        }
    }
}

/// Why a fragment was left out of the compiled set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum DropReason {
    /// Key does not follow `find[field]` / `find[field][$op]`
    Malformed,
    /// Value was empty
    EmptyValue,
    /// Operator token is not one we understand
    UnknownOperator(String),
    /// Field name is not a plain identifier
    InvalidField,
    /// Caller tried to constrain the tenant field
    TenantField,
    /// `$regex` value does not compile
    InvalidPattern(String),
    /// Sort key is not a usable field
    InvalidSortKey,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed fragment"),
            Self::EmptyValue => write!(f, "empty value"),
            Self::UnknownOperator(op) => write!(f, "unknown operator {}", op),
            Self::InvalidField => write!(f, "invalid field name"),
            Self::TenantField => write!(f, "tenant field is not caller-controlled"),
            Self::InvalidPattern(msg) => write!(f, "invalid pattern: {}", msg),
            Self::InvalidSortKey => write!(f, "invalid sort key"),
        }
    }
}

/// A fragment that was discarded, kept for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedFragment {
    pub fragment: String,
    #[serde(flatten)]
    pub reason: DropReason,
}

impl DroppedFragment {
    pub fn new(fragment: impl Into<String>, reason: DropReason) -> Self {
        let fragment = fragment.into();
        debug!("Dropping filter fragment `{}`: {}", fragment, reason);
        Self { fragment, reason }
    }
}

/// Output of [`parse_filter`].
#[derive(Debug, Clone, Default)]
pub struct ParsedFilter {
    /// Clauses in the order they appeared
    pub clauses: Vec<FilterClause>,
    /// Raw `sort` companion parameter, if any
    pub sort: Option<String>,
    /// Fragments that were discarded
    pub dropped: Vec<DroppedFragment>,
}

/// Whether a name is safe to use as a record field.
pub fn is_valid_field(name: &str) -> bool {
    FIELD_NAME.is_match(name)
}

/// Split a raw query string into filter clauses.
///
/// Keys and values are percent-decoded. Keys not starting with `find` are
/// companion parameters (`count`, `token`, ...) and are ignored here, except
/// `sort` which is captured.
pub fn parse_filter(raw: &str) -> ParsedFilter {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    let mut parsed = ParsedFilter::default();

    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        if key == "sort" {
            if !value.trim().is_empty() {
                parsed.sort = Some(value.into_owned());
            }
            continue;
        }

        if !key.starts_with("find") {
            continue;
        }

        let fragment = format!("{}={}", key, value);

        let Some(caps) = FRAGMENT_KEY.captures(&key) else {
            parsed
                .dropped
                .push(DroppedFragment::new(fragment, DropReason::Malformed));
            continue;
        };

        let field = &caps[1];
        if !is_valid_field(field) {
            parsed
                .dropped
                .push(DroppedFragment::new(fragment, DropReason::InvalidField));
            continue;
        }

        let operator = match caps.get(2) {
            None => Operator::Eq,
            Some(token) => match Operator::from_token(token.as_str()) {
                Some(op) => op,
                None => {
                    let reason = DropReason::UnknownOperator(token.as_str().to_string());
                    parsed.dropped.push(DroppedFragment::new(fragment, reason));
                    continue;
                }
            },
        };

        if value.is_empty() {
            parsed
                .dropped
                .push(DroppedFragment::new(fragment, DropReason::EmptyValue));
            continue;
        }

        parsed.clauses.push(FilterClause {
            field: field.to_string(),
            operator,
            raw_value: value.into_owned(),
        });
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(field: &str, operator: Operator, raw_value: &str) -> FilterClause {
        FilterClause {
            field: field.to_string(),
            operator,
            raw_value: raw_value.to_string(),
        }
    }

    #[test]
    fn test_operator_tokens() {
        assert_eq!(Operator::from_token("$gte"), Some(Operator::Gte));
        assert_eq!(Operator::from_token("$nin"), Some(Operator::NotIn));
        assert_eq!(Operator::from_token("$like"), Some(Operator::Like));
        assert_eq!(Operator::from_token("$eq"), None);
        assert_eq!(Operator::from_token("gte"), None);

        for op in [Operator::Gt, Operator::In, Operator::Regex] {
            assert_eq!(op.token().and_then(Operator::from_token), Some(op));
        }
        assert_eq!(Operator::Eq.token(), None);
    }

    #[test]
    fn test_parse_plain_and_operator_fragments() {
        let parsed = parse_filter("find[type]=sgv&find[sgv][$gte]=70&find[sgv][$lte]=180");
        assert_eq!(
            parsed.clauses,
            vec![
                clause("type", Operator::Eq, "sgv"),
                clause("sgv", Operator::Gte, "70"),
                clause("sgv", Operator::Lte, "180"),
            ]
        );
        assert!(parsed.dropped.is_empty());
    }

    #[test]
    fn test_parse_percent_decodes() {
        let parsed = parse_filter("find%5BdateString%5D%5B%24gte%5D=2023-11-14T00%3A00%3A00Z");
        assert_eq!(
            parsed.clauses,
            vec![clause("dateString", Operator::Gte, "2023-11-14T00:00:00Z")]
        );
    }

    #[test]
    fn test_parse_ignores_companion_params() {
        let parsed = parse_filter("?count=5&token=abc&find[type]=mbg&sort=-date");
        assert_eq!(parsed.clauses, vec![clause("type", Operator::Eq, "mbg")]);
        assert_eq!(parsed.sort.as_deref(), Some("-date"));
        assert!(parsed.dropped.is_empty());
    }

    #[test]
    fn test_parse_accepts_list_suffix() {
        let parsed = parse_filter("find[type][$in][]=sgv&find[type][$in][]=mbg");
        assert_eq!(
            parsed.clauses,
            vec![
                clause("type", Operator::In, "sgv"),
                clause("type", Operator::In, "mbg"),
            ]
        );
    }

    #[test]
    fn test_parse_drops_bad_fragments() {
        let parsed = parse_filter(
            "find=1&find[sgv][$where]=1&find[a.b]=1&find[sgv]=&findx=2&find[sgv][$gt]=100",
        );

        assert_eq!(parsed.clauses, vec![clause("sgv", Operator::Gt, "100")]);

        let reasons: Vec<_> = parsed.dropped.iter().map(|d| d.reason.clone()).collect();
        assert_eq!(
            reasons,
            vec![
                DropReason::Malformed,
                DropReason::UnknownOperator("$where".to_string()),
                DropReason::InvalidField,
                DropReason::EmptyValue,
                DropReason::Malformed,
            ]
        );
    }

    #[test]
    fn test_parse_empty_string() {
        let parsed = parse_filter("");
        assert!(parsed.clauses.is_empty());
        assert!(parsed.sort.is_none());
        assert!(parsed.dropped.is_empty());
    }

    #[test]
    fn test_field_name_validation() {
        assert!(is_valid_field("sgv"));
        assert!(is_valid_field("_id"));
        assert!(is_valid_field("created_at"));
        assert!(!is_valid_field("1abc"));
        assert!(!is_valid_field("a b"));
        assert!(!is_valid_field("x`; DELETE entry"));
    }
}
