//! CGM entry endpoints.

use axum::Json;
use axum::extract::{Extension, Path, RawQuery, State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};
use uuid::Uuid;

use super::{ApiError, SharedState, into_batch};
use crate::auth::Identity;
use crate::db::schema::{ENTRY_TABLE, EntryRecord};
use crate::query::{
    FilterValue, Operator, Predicate, compile, compile_deletion, format_timestamp,
    parse_timestamp, requested_count,
};

/// Field entry queries are windowed and ordered by.
pub const ENTRY_TIMESTAMP_FIELD: &str = "date";

const ENTRY_TYPES: &[&str] = &["sgv", "mbg", "cal", "etc"];

const DIRECTIONS: &[&str] = &[
    "Flat",
    "SingleUp",
    "DoubleUp",
    "SingleDown",
    "DoubleDown",
    "FortyFiveUp",
    "FortyFiveDown",
    "NOT COMPUTABLE",
    "RATE OUT OF RANGE",
];

/// An entry as uploaded by a client.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryUpload {
    #[serde(default, rename = "type")]
    pub entry_type: Option<String>,
    #[serde(default)]
    pub date_string: Option<String>,
    #[serde(default)]
    pub date: Option<i64>,
    #[serde(default)]
    pub sgv: Option<i64>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub noise: Option<i64>,
    #[serde(default)]
    pub filtered: Option<f64>,
    #[serde(default)]
    pub unfiltered: Option<f64>,
    #[serde(default)]
    pub rssi: Option<i64>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub slope: Option<f64>,
    #[serde(default)]
    pub intercept: Option<f64>,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub mbg: Option<i64>,
    #[serde(default)]
    pub sys_time: Option<String>,
    #[serde(default)]
    pub utc_offset: Option<i64>,
}

impl EntryUpload {
    /// Validate and fill defaults. `now_ms` is used when the upload carries
    /// no date at all.
    pub fn into_record(self, now_ms: i64) -> Result<EntryRecord, String> {
        let entry_type = self.entry_type.unwrap_or_else(|| "sgv".to_string());
        if !ENTRY_TYPES.contains(&entry_type.as_str()) {
            return Err(format!(
                "type must be one of {}",
                ENTRY_TYPES.join(", ")
            ));
        }

        let (date, date_string) = match (self.date, self.date_string) {
            (Some(date), Some(date_string)) => {
                if parse_timestamp(&date_string).is_none() {
                    return Err("dateString must be an ISO 8601 date".to_string());
                }
                (date, date_string)
            }
            (None, Some(date_string)) => {
                let date = parse_timestamp(&date_string)
                    .ok_or_else(|| "dateString must be an ISO 8601 date".to_string())?;
                (date, date_string)
            }
            (Some(date), None) => {
                let date_string =
                    format_timestamp(date).ok_or_else(|| "date is out of range".to_string())?;
                (date, date_string)
            }
            (None, None) => {
                let date_string =
                    format_timestamp(now_ms).ok_or_else(|| "date is out of range".to_string())?;
                (now_ms, date_string)
            }
        };

        if let Some(sgv) = self.sgv
            && !(0..=1000).contains(&sgv)
        {
            return Err("sgv must be between 0 and 1000".to_string());
        }

        if let Some(noise) = self.noise
            && !(1..=4).contains(&noise)
        {
            return Err("noise must be between 1 and 4".to_string());
        }

        if let Some(direction) = &self.direction
            && !DIRECTIONS.contains(&direction.as_str())
        {
            return Err(format!("direction `{}` is not a known trend", direction));
        }

        Ok(EntryRecord {
            id: Uuid::new_v4().to_string(),
            entry_type,
            date_string,
            date,
            sgv: self.sgv,
            direction: self.direction,
            noise: self.noise,
            filtered: self.filtered,
            unfiltered: self.unfiltered,
            rssi: self.rssi,
            device: self.device,
            slope: self.slope,
            intercept: self.intercept,
            scale: Some(self.scale.unwrap_or(1.0)),
            mbg: self.mbg,
            sys_time: self.sys_time,
            utc_offset: Some(self.utc_offset.unwrap_or(0)),
        })
    }
}

/// GET /entries
pub async fn list_entries(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<EntryRecord>>, ApiError> {
    let raw = query.unwrap_or_default();
    let compiled = compile(&raw, identity.id(), requested_count(&raw), ENTRY_TIMESTAMP_FIELD);

    let entries = state
        .records
        .query_records(ENTRY_TABLE, &compiled)
        .await
        .map_err(|e| {
            error!("Error fetching entries: {}", e);
            ApiError::Internal("Failed to fetch entries".to_string())
        })?;

    Ok(Json(entries))
}

/// GET /entries/{selector}
///
/// `sgv` adds nothing, a UUID selects one entry, anything else is a type.
pub async fn entries_by_selector(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Path(selector): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<EntryRecord>>, ApiError> {
    let raw = query.unwrap_or_default();
    let mut compiled = compile(&raw, identity.id(), requested_count(&raw), ENTRY_TIMESTAMP_FIELD);

    let selector = selector.strip_suffix(".json").unwrap_or(&selector);
    if selector != "sgv" {
        let predicate = if Uuid::parse_str(selector).is_ok() {
            Predicate::new("_id", Operator::Eq, FilterValue::Text(selector.to_string()))
        } else {
            Predicate::new("type", Operator::Eq, FilterValue::Text(selector.to_string()))
        };
        compiled.and(predicate);
    }

    let entries = state
        .records
        .query_records(ENTRY_TABLE, &compiled)
        .await
        .map_err(|e| {
            error!("Error fetching entries by selector: {}", e);
            ApiError::Internal("Failed to fetch entries".to_string())
        })?;

    Ok(Json(entries))
}

/// POST /entries
///
/// Accepts one entry or an array; responds with the rejected ones.
pub async fn create_entries(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<Value>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let now_ms = Utc::now().timestamp_millis();
    let mut rejected = Vec::new();
    let mut stored = 0usize;

    for raw in into_batch(body) {
        let record = serde_json::from_value::<EntryUpload>(raw.clone())
            .map_err(|e| e.to_string())
            .and_then(|upload| upload.into_record(now_ms));

        let record = match record {
            Ok(record) => record,
            Err(message) => {
                rejected.push(json!({ "entry": raw, "error": message }));
                continue;
            }
        };

        state
            .records
            .insert(ENTRY_TABLE, identity.id(), record)
            .await
            .map_err(|e| {
                error!("Error creating entries: {}", e);
                ApiError::Internal("Failed to create entries".to_string())
            })?;
        stored += 1;
    }

    info!(
        "Stored {} entries for {} ({} rejected)",
        stored,
        identity.id(),
        rejected.len()
    );
    Ok(Json(rejected))
}

/// DELETE /entries
pub async fn delete_entries(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    RawQuery(query): RawQuery,
) -> Result<Json<Value>, ApiError> {
    let raw = query.unwrap_or_default();
    let scope = compile_deletion(&raw, identity.id(), requested_count(&raw));

    let deleted = state
        .records
        .delete_matching(ENTRY_TABLE, &scope.predicates, scope.limit)
        .await
        .map_err(|e| {
            error!("Error deleting entries: {}", e);
            ApiError::Internal("Failed to delete entries".to_string())
        })?;

    Ok(Json(json!({
        "deleted": deleted,
        "message": format!("{} entries deleted successfully", deleted),
    })))
}
