use serde::{Deserialize, Serialize};

/// Canonical soil temperature reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "temperature")]
    pub temperature_celsius: f64,
    #[serde(rename = "timestamp")]
    pub timestamp_iso: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(
        rename = "sensorId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sensor_id: Option<String>,
}

/// Reading as sent by the temperature API, before normalization.
/// Upstream uses `time`, older payloads use `timestamp`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    /// Numeric in well-formed records. Anything else is dropped during
    /// normalization instead of failing the whole batch.
    #[serde(default)]
    pub temperature: serde_json::Value,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "sensorId", default)]
    pub sensor_id: Option<String>,
}

/// Temperature API response envelope
#[derive(Debug, Deserialize)]
pub struct TemperatureEnvelope {
    pub status: String,
    #[serde(default)]
    pub data: Option<Vec<RawReading>>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Bearer token for the device platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at_ms: i64,
}

impl AccessToken {
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenResult {
    pub access_token: String,
    /// Lifetime in seconds
    pub expire_time: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
}

/// Generic vendor response `{ success, result, msg }`
#[derive(Debug, Deserialize)]
pub struct VendorResponse<T> {
    #[serde(default)]
    pub success: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
}

/// One entry of a device status list, e.g. `{"code": "cur_voltage", "value": 2304}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorStatusCode {
    pub code: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub status: Vec<VendorStatusCode>,
}

/// One entry of `GET /v1.0/devices/{id}/logs`
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceLogEntry {
    /// Epoch milliseconds
    pub event_time: i64,
    /// Object with `voltage`, `current`, `power` and `energy` when present
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub device_name: Option<String>,
}

/// Point-in-time electrical measurements of a breaker device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceElectricalSnapshot {
    /// V
    pub voltage: f64,
    /// A
    pub current: f64,
    /// W
    pub power: f64,
    /// kWh
    #[serde(rename = "energy")]
    pub energy_total: f64,
    pub device_id: String,
    pub device_name: String,
    #[serde(rename = "timestamp")]
    pub timestamp_iso: String,
}
