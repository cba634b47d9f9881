use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::sql::Datetime;

pub const USER_TABLE: &str = "user";
pub const ENTRY_TABLE: &str = "entry";
pub const TREATMENT_TABLE: &str = "treatment";

/// Field every record is stamped with and every query is scoped by.
pub const OWNER_FIELD: &str = "owner";

/// Persisted identity, including the raw secret needed for legacy digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Directory-assigned identifier (UUID string)
    pub user_id: String,
    /// Optional email for display and CLI lookups
    pub email: Option<String>,
    /// Raw API secret
    pub api_secret: String,
    /// SHA-256 of `api_secret`, hex encoded
    pub secret_hash: String,
    /// Whether the identity may authenticate
    pub is_active: bool,
    /// When the identity was provisioned
    pub created_at: Option<Datetime>,
}

/// Payload for provisioning a new identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityCreate {
    pub user_id: String,
    pub email: Option<String>,
    pub api_secret: String,
    pub secret_hash: String,
}

/// A stored CGM reading or calibration, in Nightscout field naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub date_string: String,
    /// Epoch milliseconds
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sgv: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unfiltered: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intercept: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbg: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset: Option<i64>,
}

/// A stored Careportal treatment. `created_at` is kept as epoch
/// milliseconds so it compares against coerced filter dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub event_type: String,
    #[serde(rename = "created_at")]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glucose: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glucose_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insulin: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmitter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entered_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_top: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_bottom: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_bolus: Option<i64>,
}

impl TreatmentRecord {
    /// Render for clients: `created_at` as RFC 3339 plus `mills`.
    pub fn to_nightscout(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            let created = DateTime::<Utc>::from_timestamp_millis(self.created_at)
                .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
                .unwrap_or_default();
            map.insert("created_at".to_string(), Value::String(created));
            map.insert("mills".to_string(), Value::from(self.created_at));
        }
        value
    }
}

/// A record paired with the tenant that owns it, as written to storage.
#[derive(Debug, Clone, Serialize)]
pub struct Owned<T> {
    pub owner: String,
    #[serde(flatten)]
    pub record: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> EntryRecord {
        EntryRecord {
            id: "e1".to_string(),
            entry_type: "sgv".to_string(),
            date_string: "2023-11-14T22:13:20.000Z".to_string(),
            date: 1_700_000_000_000,
            sgv: Some(120),
            direction: Some("Flat".to_string()),
            noise: None,
            filtered: None,
            unfiltered: None,
            rssi: None,
            device: Some("xDrip-DexcomG6".to_string()),
            slope: None,
            intercept: None,
            scale: None,
            mbg: None,
            sys_time: None,
            utc_offset: None,
        }
    }

    #[test]
    fn test_entry_uses_nightscout_field_names() {
        let json = serde_json::to_value(sample_entry()).unwrap();
        assert_eq!(json["_id"], "e1");
        assert_eq!(json["type"], "sgv");
        assert_eq!(json["dateString"], "2023-11-14T22:13:20.000Z");
        assert_eq!(json["date"], 1_700_000_000_000i64);
        assert!(json.get("noise").is_none());
    }

    #[test]
    fn test_owned_flattens_record() {
        let owned = Owned {
            owner: "tenant-1".to_string(),
            record: sample_entry(),
        };
        let json = serde_json::to_value(&owned).unwrap();
        assert_eq!(json["owner"], "tenant-1");
        assert_eq!(json["sgv"], 120);
    }

    #[test]
    fn test_treatment_to_nightscout() {
        let treatment = TreatmentRecord {
            id: "t1".to_string(),
            event_type: "Meal Bolus".to_string(),
            created_at: 1_700_000_000_000,
            glucose: None,
            glucose_type: None,
            carbs: Some(45.0),
            protein: None,
            fat: None,
            insulin: Some(4.5),
            units: None,
            transmitter_id: None,
            sensor_code: None,
            notes: None,
            entered_by: None,
            duration: None,
            percent: None,
            absolute: None,
            rate: None,
            temp: None,
            target_top: None,
            target_bottom: None,
            profile: None,
            reason: None,
            pre_bolus: None,
        };

        let json = treatment.to_nightscout();
        assert_eq!(json["eventType"], "Meal Bolus");
        assert_eq!(json["created_at"], "2023-11-14T22:13:20.000Z");
        assert_eq!(json["mills"], 1_700_000_000_000i64);
        assert_eq!(json["carbs"], 45.0);
    }
}
