//! Server status, profile and device status endpoints.

use axum::Json;
use axum::extract::{Extension, State};
use chrono::Utc;
use serde_json::{Value, json};

use super::SharedState;
use super::middleware::CallerIdentity;

const SHOW_PLUGINS: &str = "careportal boluscalc food bwp cage sage iage iob cob basal ar2 rawbg upbat";

/// GET /status
///
/// Authentication is optional; `authorized` reflects whether the caller
/// resolved to an identity.
pub async fn get_status(
    State(state): State<SharedState>,
    Extension(CallerIdentity(caller)): Extension<CallerIdentity>,
) -> Json<Value> {
    let authorized = caller.as_ref().map(|_| {
        json!({
            "read": true,
            "write": true,
            "admin": false,
        })
    });

    Json(json!({
        "apiEnabled": true,
        "careportalEnabled": true,
        "head": std::env::var("GIT_COMMIT").unwrap_or_else(|_| "unknown".to_string()),
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "serverTime": Utc::now().to_rfc3339(),
        "settings": {
            "units": "mg/dl",
            "timeFormat": 12,
            "customTitle": state.app_name,
            "nightMode": false,
            "theme": "default",
            "language": "en",
            "showPlugins": SHOW_PLUGINS,
            "showRawbg": "never",
            "alarmTypes": ["simple"],
            "alarmUrgentHigh": true,
            "alarmHigh": true,
            "alarmLow": true,
            "alarmUrgentLow": true,
            "alarmTimeagoWarn": true,
            "alarmTimeagoWarnMins": 15,
            "alarmTimeagoUrgent": true,
            "alarmTimeagoUrgentMins": 30,
            "enable": SHOW_PLUGINS.split(' ').collect::<Vec<_>>(),
            "thresholds": {
                "bg_high": 180,
                "bg_target_top": 150,
                "bg_target_bottom": 80,
                "bg_low": 70,
            },
        },
        "extendedSettings": {
            "devicestatus": { "advanced": true },
            "pump": { "fields": "reservoir battery clock status" },
            "openaps": { "enableAlerts": true },
            "loop": { "enableAlerts": true },
            "override": { "enableAlerts": true },
            "xdripjs": { "enableAlerts": true },
        },
        "authorized": authorized,
    }))
}

/// GET /profile
///
/// A fixed single-segment profile in mg/dl.
pub async fn get_profile() -> Json<Value> {
    let now = Utc::now();
    let segment = |value: f64| json!([{ "time": "00:00", "value": value }]);

    Json(json!({
        "dia": 3,
        "carbratio": segment(15.0),
        "carbs_hr": 20,
        "delay": 20,
        "sens": segment(50.0),
        "timezone": "UTC",
        "basal": segment(1.0),
        "target_low": segment(80.0),
        "target_high": segment(150.0),
        "startDate": now.to_rfc3339(),
        "mills": now.timestamp_millis(),
        "units": "mg/dl",
        "created_at": now.to_rfc3339(),
    }))
}

/// GET and POST /devicestatus
pub async fn device_status() -> Json<Vec<Value>> {
    Json(Vec::new())
}

/// GET /health
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
