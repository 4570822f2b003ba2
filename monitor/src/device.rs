use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::DeviceApiConfig;
use crate::errors::{Error, Result};
use crate::metrics::{
    DEVICE_FAILURES_TOTAL, DEVICE_REQUESTS_TOTAL, TOKEN_REFRESHES_TOTAL, UPSTREAM_LATENCY_SECONDS,
};
use crate::model::{
    AccessToken, DeviceElectricalSnapshot, DeviceInfo, DeviceLogEntry, TokenResult,
    VendorResponse, VendorStatusCode,
};
use crate::signing::{Signer, SIGN_METHOD};

const TOKEN_PATH: &str = "/v1.0/token?grant_type=1";
const DEFAULT_DEVICE_NAME: &str = "MCB Device";
/// Device log type for reported data points
const LOG_TYPE_DATA_POINT: u8 = 7;
const DEFAULT_LOG_WINDOW_HOURS: i64 = 24;

/// Status code, snapshot field and the divisor that turns the raw integer
/// into SI units. Breakers report `cur_voltage` in 0.1 V, `cur_current` in mA,
/// `cur_power` in 0.1 W and `add_ele` in 0.01 kWh.
const ELECTRICAL_CODES: &[(&str, ElectricalField, f64)] = &[
    ("cur_voltage", ElectricalField::Voltage, 10.0),
    ("voltage", ElectricalField::Voltage, 1.0),
    ("cur_current", ElectricalField::Current, 1000.0),
    ("current", ElectricalField::Current, 1.0),
    ("cur_power", ElectricalField::Power, 10.0),
    ("power", ElectricalField::Power, 1.0),
    ("add_ele", ElectricalField::Energy, 100.0),
    ("total_forward_energy", ElectricalField::Energy, 100.0),
    ("energy", ElectricalField::Energy, 1.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElectricalField {
    Voltage,
    Current,
    Power,
    Energy,
}

/// Client for the signed device-control API.
///
/// Owns a single cached access token. The cache lock is held while a token
/// is being exchanged, so callers racing on an expired token trigger one
/// exchange between them.
pub struct DeviceClient {
    http: Client,
    config: DeviceApiConfig,
    signer: Signer,
    clock: Arc<dyn Clock>,
    token: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeviceClient {
    pub fn new(config: DeviceApiConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: DeviceApiConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        let signer = Signer::new(config.client_id.clone(), config.client_secret.clone());
        Ok(Self {
            http,
            config,
            signer,
            clock,
            token: Mutex::new(None),
        })
    }

    pub fn default_device_id(&self) -> Option<&str> {
        self.config.device_id.as_deref()
    }

    /// Returns the cached token while it is valid, otherwise exchanges a new one.
    pub async fn ensure_valid_token(&self) -> Result<AccessToken> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_valid_at(self.clock.now_ms()) {
                debug!("Using cached access token");
                return Ok(token.clone());
            }
        }

        info!(
            "Requesting new access token from {} (client {})",
            self.config.base_url,
            self.signer.client_id()
        );
        let token = self.exchange_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn exchange_token(&self) -> Result<AccessToken> {
        TOKEN_REFRESHES_TOTAL.inc();
        let (status, body) = self.send_signed(TOKEN_PATH, None).await?;

        if !status.is_success() {
            warn!("Token exchange failed with {}: {}", status, body);
            return Err(Error::Authentication {
                status: status.as_u16(),
                body,
            });
        }

        let response: VendorResponse<TokenResult> = serde_json::from_str(&body)?;
        match response.result {
            Some(result) if response.success => {
                let expires_at_ms = self
                    .clock
                    .now_ms()
                    .saturating_add(result.expire_time.saturating_mul(1000));
                info!("Access token obtained, valid for {}s", result.expire_time);
                Ok(AccessToken {
                    token: result.access_token,
                    expires_at_ms,
                })
            }
            _ => {
                warn!("Token response not successful: {}", body);
                Err(Error::Authentication {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    /// Reads the current status codes of a device.
    pub async fn get_device_status(&self, device_id: &str) -> Result<Vec<VendorStatusCode>> {
        let path = format!("/v1.0/devices/{}/status", device_id);
        let response: VendorResponse<Vec<VendorStatusCode>> = self.authorized_get(&path).await?;
        Ok(successful(response, "Device status request")?.unwrap_or_default())
    }

    pub async fn get_device_info(&self, device_id: &str) -> Result<DeviceInfo> {
        let path = format!("/v1.0/devices/{}", device_id);
        let response: VendorResponse<DeviceInfo> = self.authorized_get(&path).await?;
        successful(response, "Device info request")?
            .ok_or_else(|| Error::ApiSemantic(format!("No info returned for device {}", device_id)))
    }

    /// Lists every device visible to the project account.
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let path = format!("/v1.0/users/{}/devices", self.config.project_code);
        let response: VendorResponse<Vec<DeviceInfo>> = self.authorized_get(&path).await?;
        let devices = successful(response, "Device list request")?.unwrap_or_default();
        info!("Found {} devices", devices.len());
        Ok(devices)
    }

    /// Logged electrical values of a device between `start` and `end`,
    /// oldest first as returned by the platform. The device defaults to the
    /// configured one, `end` to now and `start` to 24 hours before `end`.
    pub async fn get_device_logs(
        &self,
        device_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<DeviceElectricalSnapshot>> {
        let device_id = device_id
            .or(self.default_device_id())
            .ok_or_else(|| Error::Config("No device id given and none configured".to_string()))?;

        let end = match end {
            Some(end) => end,
            None => millis_to_datetime(self.clock.now_ms()).unwrap_or_else(Utc::now),
        };
        let start = start.unwrap_or(end - Duration::hours(DEFAULT_LOG_WINDOW_HOURS));
        info!(
            "Getting logs for {} from {} to {}",
            device_id,
            start.to_rfc3339_opts(SecondsFormat::Millis, true),
            end.to_rfc3339_opts(SecondsFormat::Millis, true)
        );

        // Query keys in sorted order, they are part of the signed path
        let path = format!(
            "/v1.0/devices/{}/logs?end_time={}&start_time={}&type={}",
            device_id,
            end.timestamp_millis(),
            start.timestamp_millis(),
            LOG_TYPE_DATA_POINT
        );
        let response: VendorResponse<Vec<DeviceLogEntry>> = self.authorized_get(&path).await?;
        let entries = successful(response, "Device log request")?.unwrap_or_default();

        Ok(entries
            .iter()
            .filter_map(|entry| map_log_entry(entry, device_id))
            .collect())
    }

    /// Picks a device id: online match, then offline match, then the first
    /// device of any kind, then none.
    pub async fn auto_detect_device<F>(&self, predicate: F) -> Result<Option<String>>
    where
        F: Fn(&DeviceInfo) -> bool,
    {
        let devices = self.list_devices().await?;
        Ok(select_device(&devices, predicate))
    }

    /// Electrical readings of a breaker. Falls back to the configured device,
    /// then to auto-detection.
    ///
    /// Any failure yields `None` ("no data yet") instead of an error. The
    /// caller cannot tell a transient fetch failure from a device with nothing
    /// to report.
    pub async fn get_electrical_snapshot(
        &self,
        device_id: Option<&str>,
    ) -> Option<DeviceElectricalSnapshot> {
        match self.try_electrical_snapshot(device_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Electrical data unavailable: {}", e);
                None
            }
        }
    }

    async fn try_electrical_snapshot(
        &self,
        device_id: Option<&str>,
    ) -> Result<Option<DeviceElectricalSnapshot>> {
        let device_id = match device_id.or(self.default_device_id()) {
            Some(id) => id.to_string(),
            None => match self.auto_detect_device(is_breaker_candidate).await? {
                Some(id) => id,
                None => return Ok(None),
            },
        };

        let status = self.get_device_status(&device_id).await?;
        if status.is_empty() {
            return Ok(None);
        }

        let device_name = match self.get_device_info(&device_id).await {
            Ok(info) if !info.name.is_empty() => info.name,
            Ok(_) => DEFAULT_DEVICE_NAME.to_string(),
            Err(e) => {
                debug!("Could not read device name for {}: {}", device_id, e);
                DEFAULT_DEVICE_NAME.to_string()
            }
        };

        let timestamp_iso = millis_to_datetime(self.clock.now_ms())
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        Ok(Some(map_electrical(
            &status,
            device_id,
            device_name,
            timestamp_iso,
        )))
    }

    /// True when a token can be obtained with the configured credentials.
    pub async fn test_connection(&self) -> bool {
        match self.ensure_valid_token().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Device platform connection test failed: {}", e);
                false
            }
        }
    }

    async fn authorized_get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let token = self.ensure_valid_token().await?;
        let (status, body) = self.send_signed(path, Some(&token.token)).await?;

        if !status.is_success() {
            DEVICE_FAILURES_TOTAL.inc();
            warn!("Device request {} failed with {}: {}", path, status, body);
            return Err(Error::DeviceQuery {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            DEVICE_FAILURES_TOTAL.inc();
            Error::Json(e)
        })
    }

    /// Sends a signed GET and returns the raw status and body.
    async fn send_signed(
        &self,
        path: &str,
        access_token: Option<&str>,
    ) -> Result<(StatusCode, String)> {
        let headers = self.signed_headers("GET", path, access_token)?;
        let url = format!("{}{}", self.config.base_url, path);

        DEVICE_REQUESTS_TOTAL.inc();
        let start = Instant::now();
        let result = async {
            let response = self.http.get(&url).headers(headers).send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        }
        .await;
        UPSTREAM_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());

        result.map_err(|e| {
            DEVICE_FAILURES_TOTAL.inc();
            Error::Transport(e)
        })
    }

    fn signed_headers(
        &self,
        method: &str,
        path: &str,
        access_token: Option<&str>,
    ) -> Result<HeaderMap> {
        let ctx = self
            .signer
            .context(method, path, access_token, self.clock.now_ms(), None)?;

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "client_id", &ctx.client_id)?;
        if let Some(token) = access_token {
            insert_header(&mut headers, "access_token", token)?;
        }
        insert_header(&mut headers, "sign_method", SIGN_METHOD)?;
        insert_header(&mut headers, "t", &ctx.timestamp)?;
        insert_header(&mut headers, "nonce", &ctx.nonce)?;
        insert_header(&mut headers, "sign", &ctx.signature)?;
        Ok(headers)
    }
}

fn successful<T>(response: VendorResponse<T>, what: &str) -> Result<Option<T>> {
    if !response.success {
        return Err(Error::ApiSemantic(
            response
                .msg
                .unwrap_or_else(|| format!("{} was not successful", what)),
        ));
    }
    Ok(response.result)
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| Error::Signing(format!("Invalid value for header {}: {}", name, e)))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

/// Default heuristic for breaker-like devices.
pub fn is_breaker_candidate(device: &DeviceInfo) -> bool {
    let name = device.name.to_lowercase();
    let product = device.product_name.to_lowercase();

    matches!(device.category.as_str(), "dlq" | "kg" | "cz")
        || name.contains("mcb")
        || name.contains("switch")
        || name.contains("breaker")
        || product.contains("mcb")
        || product.contains("switch")
}

/// online-matching > offline-matching > first-of-any > none
pub fn select_device<F>(devices: &[DeviceInfo], predicate: F) -> Option<String>
where
    F: Fn(&DeviceInfo) -> bool,
{
    let matching: Vec<&DeviceInfo> = devices.iter().filter(|d| predicate(d)).collect();

    if let Some(device) = matching.iter().find(|d| d.online) {
        info!("Using online device {} ({})", device.id, device.name);
        return Some(device.id.clone());
    }
    if let Some(device) = matching.first() {
        warn!("Using offline device {} ({})", device.id, device.name);
        return Some(device.id.clone());
    }
    if let Some(device) = devices.first() {
        info!("No matching device, using first available {}", device.id);
        return Some(device.id.clone());
    }

    warn!("No devices found");
    None
}

/// Maps vendor status codes onto a snapshot. Unknown codes and non-numeric
/// values are ignored; fields without a code stay at zero.
pub fn map_electrical(
    status: &[VendorStatusCode],
    device_id: String,
    device_name: String,
    timestamp_iso: String,
) -> DeviceElectricalSnapshot {
    let mut snapshot = DeviceElectricalSnapshot {
        voltage: 0.0,
        current: 0.0,
        power: 0.0,
        energy_total: 0.0,
        device_id,
        device_name,
        timestamp_iso,
    };

    for entry in status {
        let Some((_, field, divisor)) = ELECTRICAL_CODES
            .iter()
            .find(|(code, _, _)| *code == entry.code)
        else {
            continue;
        };
        let Some(raw) = entry.value.as_f64() else {
            debug!("Ignoring non-numeric value for {}", entry.code);
            continue;
        };

        let value = raw / divisor;
        match field {
            ElectricalField::Voltage => snapshot.voltage = value,
            ElectricalField::Current => snapshot.current = value,
            ElectricalField::Power => snapshot.power = value,
            ElectricalField::Energy => snapshot.energy_total = value,
        }
    }

    snapshot
}

/// Maps one log entry onto a snapshot. Missing values read as zero; an
/// out-of-range `event_time` drops the entry.
pub fn map_log_entry(entry: &DeviceLogEntry, device_id: &str) -> Option<DeviceElectricalSnapshot> {
    let Some(at) = millis_to_datetime(entry.event_time) else {
        debug!("Ignoring log entry with invalid event_time {}", entry.event_time);
        return None;
    };
    let value = |key: &str| entry.value.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0);

    Some(DeviceElectricalSnapshot {
        voltage: value("voltage"),
        current: value("current"),
        power: value("power"),
        energy_total: value("energy"),
        device_id: device_id.to_string(),
        device_name: entry
            .device_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
        timestamp_iso: at.to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}
