use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::error;

use crate::device::DeviceClient;
use crate::errors::Error;
use crate::model::{DeviceElectricalSnapshot, DeviceInfo, SensorReading};
use crate::normalize::{average_of, latest_of};
use crate::poll::FetchState;
use crate::temperature::TemperatureService;

const NO_ELECTRICAL_DATA: &str = "No electrical data available";

#[derive(Clone)]
pub struct AppState {
    pub temperature: Arc<TemperatureService>,
    pub devices: Arc<DeviceClient>,
    pub latest: watch::Receiver<FetchState<Vec<SensorReading>>>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ElectricalQuery {
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceLogQuery {
    device_id: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

/// Polled temperature state plus derived values for the dashboard cards.
#[derive(Debug, Serialize)]
pub struct TemperatureView {
    #[serde(flatten)]
    pub state: FetchState<Vec<SensorReading>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<SensorReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub data: Vec<SensorReading>,
    pub total: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Contract of the dashboard's electrical card: `{success, data}` or `{success, error}`.
#[derive(Debug, Serialize)]
pub struct ElectricalResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DeviceElectricalSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/temperature", get(get_temperature))
        .route("/api/v1/temperature/history", get(get_temperature_history))
        .route("/api/v1/temperature/average", get(get_temperature_average))
        .route("/api/v1/devices", get(get_devices))
        .route("/api/v1/devices/connection", get(get_connection))
        .route("/api/v1/devices/logs", get(get_device_logs))
        .route("/api/tuya/device/status", get(get_electrical))
        .with_state(state)
}

pub async fn get_temperature(State(state): State<AppState>) -> Json<TemperatureView> {
    let current = state.latest.borrow().clone();
    let (latest, average) = match current.data() {
        Some(readings) => (latest_of(readings).cloned(), average_of(readings)),
        None => (None, None),
    };

    Json(TemperatureView {
        state: current,
        latest,
        average,
    })
}

pub async fn get_temperature_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    if params.start > params.end {
        return Err(AppError::BadRequest(
            "start must not be after end".to_string(),
        ));
    }

    let data = state
        .temperature
        .fetch_range(params.start, params.end)
        .await?;

    Ok(Json(HistoryResponse {
        total: data.len(),
        data,
        start: params.start,
        end: params.end,
    }))
}

pub async fn get_temperature_average(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let average = state.temperature.fetch_average().await?;
    Ok(Json(json!({ "average": average })))
}

pub async fn get_devices(State(state): State<AppState>) -> Result<Json<Vec<DeviceInfo>>, AppError> {
    Ok(Json(state.devices.list_devices().await?))
}

pub async fn get_device_logs(
    State(state): State<AppState>,
    Query(params): Query<DeviceLogQuery>,
) -> Result<Json<Vec<DeviceElectricalSnapshot>>, AppError> {
    if let (Some(start), Some(end)) = (params.start, params.end) {
        if start > end {
            return Err(AppError::BadRequest(
                "start must not be after end".to_string(),
            ));
        }
    }

    let logs = state
        .devices
        .get_device_logs(params.device_id.as_deref(), params.start, params.end)
        .await?;
    Ok(Json(logs))
}

pub async fn get_connection(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "connected": state.devices.test_connection().await }))
}

pub async fn get_electrical(
    State(state): State<AppState>,
    Query(params): Query<ElectricalQuery>,
) -> Json<ElectricalResponse> {
    let snapshot = state
        .devices
        .get_electrical_snapshot(params.device_id.as_deref())
        .await;

    Json(match snapshot {
        Some(data) => ElectricalResponse {
            success: true,
            data: Some(data),
            error: None,
        },
        None => ElectricalResponse {
            success: false,
            data: None,
            error: Some(NO_ELECTRICAL_DATA.to_string()),
        },
    })
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Upstream(Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Upstream(e) => {
                error!("API error: {}", e);
                let status = if e.is_upstream() {
                    StatusCode::BAD_GATEWAY
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (status, e.to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError::Upstream(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceApiConfig, TemperatureApiConfig};
    use std::time::Duration;

    fn reading(ts: &str, temperature: f64) -> SensorReading {
        SensorReading {
            id: None,
            temperature_celsius: temperature,
            timestamp_iso: ts.to_string(),
            location: None,
            sensor_id: None,
        }
    }

    fn state_with(latest: FetchState<Vec<SensorReading>>) -> AppState {
        let temperature = TemperatureService::new(TemperatureApiConfig {
            url: "http://127.0.0.1:9/api/temperatures".to_string(),
            api_key: "key".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        let devices = DeviceClient::new(DeviceApiConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            project_code: "proj".to_string(),
            device_id: None,
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        let (_tx, rx) = watch::channel(latest);

        AppState {
            temperature: Arc::new(temperature),
            devices: Arc::new(devices),
            latest: rx,
        }
    }

    #[tokio::test]
    async fn test_temperature_view_derives_latest_and_average() {
        let state = state_with(FetchState::Ready {
            data: vec![
                reading("2024-06-01T10:00:00Z", 20.0),
                reading("2024-06-01T10:05:00Z", 24.0),
            ],
        });

        let Json(view) = get_temperature(State(state)).await;
        let value = serde_json::to_value(&view).unwrap();

        assert_eq!(value["state"], "success");
        assert_eq!(value["latest"]["temperature"], 24.0);
        assert_eq!(value["average"], 22.0);
        assert_eq!(value["data"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_temperature_view_while_loading() {
        tokio_test::block_on(async {
            let Json(view) = get_temperature(State(state_with(FetchState::Loading))).await;
            let value = serde_json::to_value(&view).unwrap();
            assert_eq!(value, json!({"state": "loading"}));
        });
    }

    #[test]
    fn test_temperature_view_after_failure() {
        tokio_test::block_on(async {
            let state = state_with(FetchState::Failed {
                error: "HTTP error: status 401, body: nope".to_string(),
            });
            let Json(view) = get_temperature(State(state)).await;
            let value = serde_json::to_value(&view).unwrap();
            assert_eq!(value["state"], "error");
            assert!(value.get("latest").is_none());
        });
    }

    #[tokio::test]
    async fn test_electrical_without_data_reports_error() {
        let state = state_with(FetchState::Loading);
        let Json(response) = get_electrical(
            State(state),
            Query(ElectricalQuery {
                device_id: Some("dev-1".to_string()),
            }),
        )
        .await;

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"success": false, "error": "No electrical data available"})
        );
    }

    #[tokio::test]
    async fn test_history_rejects_inverted_range() {
        let state = state_with(FetchState::Loading);
        let params = HistoryQuery {
            start: "2024-06-02T00:00:00Z".parse().unwrap(),
            end: "2024-06-01T00:00:00Z".parse().unwrap(),
        };

        let result = get_temperature_history(State(state), Query(params)).await;
        let response = result.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_device_logs_rejects_inverted_range() {
        let params = DeviceLogQuery {
            device_id: Some("dev-1".to_string()),
            start: Some("2024-06-02T00:00:00Z".parse().unwrap()),
            end: Some("2024-06-01T00:00:00Z".parse().unwrap()),
        };

        let result = get_device_logs(State(state_with(FetchState::Loading)), Query(params)).await;
        let response = result.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_device_logs_without_device_is_server_error() {
        let params = DeviceLogQuery {
            device_id: None,
            start: None,
            end: None,
        };

        let result = get_device_logs(State(state_with(FetchState::Loading)), Query(params)).await;
        let response = result.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_upstream_error_maps_to_bad_gateway() {
        let response = AppError::from(Error::HttpStatus {
            status: 503,
            body: "unavailable".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
