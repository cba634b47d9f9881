//! Careportal treatment endpoints.

use axum::Json;
use axum::extract::{Extension, Path, RawQuery, State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};
use uuid::Uuid;

use super::{ApiError, SharedState, into_batch};
use crate::auth::Identity;
use crate::db::schema::{OWNER_FIELD, TREATMENT_TABLE, TreatmentRecord};
use crate::query::{
    FilterValue, Operator, Predicate, compile, compile_deletion, parse_timestamp,
    requested_count,
};

/// Field treatment queries are windowed and ordered by.
pub const TREATMENT_TIMESTAMP_FIELD: &str = "created_at";

const EVENT_TYPES: &[&str] = &[
    "Correction Bolus",
    "Meal Bolus",
    "Snack Bolus",
    "Carb Correction",
    "BG Check",
    "Sensor Start",
    "Sensor Stop",
    "Pump Battery Change",
    "Insulin Change",
    "Temp Basal",
    "Profile Switch",
    "Site Change",
    "Note",
    "Question",
    "Exercise",
    "Pump Suspend",
    "Pump Resume",
];

const GLUCOSE_TYPES: &[&str] = &["Finger", "Sensor", "Manual"];
const UNITS: &[&str] = &["mg/dl", "mmol/l"];
const TEMP_KINDS: &[&str] = &["absolute", "percent"];

/// A treatment as uploaded by a client.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentUpload {
    #[serde(default)]
    pub event_type: Option<String>,
    /// ISO 8601 string or epoch milliseconds
    #[serde(default, rename = "created_at")]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub glucose: Option<i64>,
    #[serde(default)]
    pub glucose_type: Option<String>,
    #[serde(default)]
    pub carbs: Option<f64>,
    #[serde(default)]
    pub protein: Option<f64>,
    #[serde(default)]
    pub fat: Option<f64>,
    #[serde(default)]
    pub insulin: Option<f64>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub transmitter_id: Option<String>,
    #[serde(default)]
    pub sensor_code: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub entered_by: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub percent: Option<i64>,
    #[serde(default)]
    pub absolute: Option<f64>,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub temp: Option<String>,
    #[serde(default)]
    pub target_top: Option<i64>,
    #[serde(default)]
    pub target_bottom: Option<i64>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub pre_bolus: Option<i64>,
}

fn check_one_of(name: &str, value: Option<&str>, allowed: &[&str]) -> Result<(), String> {
    match value {
        Some(v) if !allowed.contains(&v) => {
            Err(format!("{} must be one of {}", name, allowed.join(", ")))
        }
        _ => Ok(()),
    }
}

fn check_non_negative(name: &str, value: Option<f64>) -> Result<(), String> {
    match value {
        Some(v) if v < 0.0 => Err(format!("{} must not be negative", name)),
        _ => Ok(()),
    }
}

fn parse_created_at(value: &Value) -> Result<i64, String> {
    match value {
        Value::String(s) => {
            parse_timestamp(s).ok_or_else(|| "created_at must be an ISO 8601 date".to_string())
        }
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| "created_at is out of range".to_string()),
        _ => Err("created_at must be a date string or epoch milliseconds".to_string()),
    }
}

impl TreatmentUpload {
    /// Validate and fill defaults.
    pub fn into_record(self, now_ms: i64) -> Result<TreatmentRecord, String> {
        let event_type = self
            .event_type
            .filter(|e| !e.is_empty())
            .ok_or_else(|| "eventType is required".to_string())?;
        check_one_of("eventType", Some(&event_type), EVENT_TYPES)?;

        let created_at = match &self.created_at {
            None | Some(Value::Null) => now_ms,
            Some(value) => parse_created_at(value)?,
        };

        if let Some(glucose) = self.glucose
            && !(0..=1000).contains(&glucose)
        {
            return Err("glucose must be between 0 and 1000".to_string());
        }
        if let Some(percent) = self.percent
            && !(0..=500).contains(&percent)
        {
            return Err("percent must be between 0 and 500".to_string());
        }

        check_one_of("glucoseType", self.glucose_type.as_deref(), GLUCOSE_TYPES)?;
        check_one_of("units", self.units.as_deref(), UNITS)?;
        check_one_of("temp", self.temp.as_deref(), TEMP_KINDS)?;

        check_non_negative("carbs", self.carbs)?;
        check_non_negative("protein", self.protein)?;
        check_non_negative("fat", self.fat)?;
        check_non_negative("insulin", self.insulin)?;
        check_non_negative("absolute", self.absolute)?;
        check_non_negative("rate", self.rate)?;
        check_non_negative("duration", self.duration.map(|d| d as f64))?;
        check_non_negative("preBolus", self.pre_bolus.map(|p| p as f64))?;

        Ok(TreatmentRecord {
            id: Uuid::new_v4().to_string(),
            event_type,
            created_at,
            glucose: self.glucose,
            glucose_type: self.glucose_type,
            carbs: self.carbs,
            protein: self.protein,
            fat: self.fat,
            insulin: self.insulin,
            units: Some(self.units.unwrap_or_else(|| "mg/dl".to_string())),
            transmitter_id: self.transmitter_id,
            sensor_code: self.sensor_code,
            notes: self.notes,
            entered_by: self.entered_by,
            duration: self.duration,
            percent: self.percent,
            absolute: self.absolute,
            rate: self.rate,
            temp: self.temp,
            target_top: self.target_top,
            target_bottom: self.target_bottom,
            profile: self.profile,
            reason: self.reason,
            pre_bolus: self.pre_bolus,
        })
    }
}

/// GET /treatments
pub async fn list_treatments(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<Value>>, ApiError> {
    let raw = query.unwrap_or_default();
    let compiled = compile(
        &raw,
        identity.id(),
        requested_count(&raw),
        TREATMENT_TIMESTAMP_FIELD,
    );

    let treatments: Vec<TreatmentRecord> = state
        .records
        .query_records(TREATMENT_TABLE, &compiled)
        .await
        .map_err(|e| {
            error!("Error fetching treatments: {}", e);
            ApiError::Internal("Failed to fetch treatments".to_string())
        })?;

    Ok(Json(
        treatments.iter().map(TreatmentRecord::to_nightscout).collect(),
    ))
}

/// POST /treatments
pub async fn create_treatments(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<Value>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let now_ms = Utc::now().timestamp_millis();
    let mut rejected = Vec::new();
    let mut stored = 0usize;

    for raw in into_batch(body) {
        let record = serde_json::from_value::<TreatmentUpload>(raw.clone())
            .map_err(|e| e.to_string())
            .and_then(|upload| upload.into_record(now_ms));

        let record = match record {
            Ok(record) => record,
            Err(message) => {
                rejected.push(json!({ "treatment": raw, "error": message }));
                continue;
            }
        };

        state
            .records
            .insert(TREATMENT_TABLE, identity.id(), record)
            .await
            .map_err(|e| {
                error!("Error creating treatments: {}", e);
                ApiError::Internal("Failed to create treatments".to_string())
            })?;
        stored += 1;
    }

    info!(
        "Stored {} treatments for {} ({} rejected)",
        stored,
        identity.id(),
        rejected.len()
    );
    Ok(Json(rejected))
}

/// DELETE /treatments
pub async fn delete_treatments(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    RawQuery(query): RawQuery,
) -> Result<Json<Value>, ApiError> {
    let raw = query.unwrap_or_default();
    let scope = compile_deletion(&raw, identity.id(), requested_count(&raw));

    let deleted = state
        .records
        .delete_matching(TREATMENT_TABLE, &scope.predicates, scope.limit)
        .await
        .map_err(|e| {
            error!("Error deleting treatments: {}", e);
            ApiError::Internal("Failed to delete treatments".to_string())
        })?;

    Ok(Json(json!({
        "deleted": deleted,
        "message": format!("{} treatments deleted successfully", deleted),
    })))
}

/// DELETE /treatments/{id}
pub async fn delete_treatment(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let predicates = [
        Predicate::new(
            OWNER_FIELD,
            Operator::Eq,
            FilterValue::Text(identity.id().as_str().to_string()),
        ),
        Predicate::new("_id", Operator::Eq, FilterValue::Text(id)),
    ];

    let deleted = state
        .records
        .delete_matching(TREATMENT_TABLE, &predicates, None)
        .await
        .map_err(|e| {
            error!("Error deleting treatment by id: {}", e);
            ApiError::Internal("Failed to delete treatment".to_string())
        })?;

    if deleted == 0 {
        return Err(ApiError::NotFound("Treatment not found".to_string()));
    }

    Ok(Json(json!({
        "n": deleted,
        "ok": 1,
        "message": "Treatment deleted successfully",
    })))
}
