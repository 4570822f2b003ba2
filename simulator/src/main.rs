mod readings;

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use readings::Reading;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Parser)]
#[command(name = "simulator", about = "Mock soil temperature API")]
struct Args {
    #[arg(long, env = "SIMULATOR_ADDR", default_value = "0.0.0.0:8081")]
    addr: String,

    #[arg(long, env = "TEMPERATURE_API_KEY", hide_env_values = true)]
    api_key: String,

    /// History generated at startup
    #[arg(long, env = "SIMULATOR_HOURS", default_value_t = 24)]
    hours: i64,

    #[arg(long, env = "SIMULATOR_INTERVAL_MINUTES", default_value_t = 5)]
    interval_minutes: i64,

    /// Answer 400 to any request carrying startDate/endDate
    #[arg(long, env = "SIMULATOR_REJECT_DATE_FILTER")]
    reject_date_filter: bool,
}

struct AppState {
    api_key: String,
    reject_date_filter: bool,
    readings: Vec<Reading>,
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    #[serde(rename = "startDate")]
    start_date: Option<String>,
    #[serde(rename = "endDate")]
    end_date: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let readings = readings::generate_series(
        &mut rand::thread_rng(),
        Utc::now(),
        Duration::hours(args.hours),
        Duration::minutes(args.interval_minutes),
    );

    info!("Starting temperature API simulator");
    info!(
        "Generated {} readings over {}h every {}min, reject date filter: {}",
        readings.len(),
        args.hours,
        args.interval_minutes,
        args.reject_date_filter
    );

    let state = Arc::new(AppState {
        api_key: args.api_key,
        reject_date_filter: args.reject_date_filter,
        readings,
    });

    let app = Router::new()
        .route("/api/temperatures", get(get_temperatures))
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(&args.addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", args.addr, e);
            return;
        }
    };

    info!("Listening on {}", args.addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("HTTP server error: {}", e);
    }
}

async fn get_temperatures(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<RangeParams>,
) -> Response {
    let key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if key != Some(state.api_key.as_str()) {
        warn!("Rejected request with missing or wrong API key");
        return failure(StatusCode::UNAUTHORIZED, "Invalid API key");
    }

    let filtered = params.start_date.is_some() || params.end_date.is_some();
    if filtered && state.reject_date_filter {
        return failure(StatusCode::BAD_REQUEST, "Unsupported query parameters");
    }

    let start = match parse_bound(params.start_date.as_deref()) {
        Ok(v) => v,
        Err(msg) => return failure(StatusCode::BAD_REQUEST, &msg),
    };
    let end = match parse_bound(params.end_date.as_deref()) {
        Ok(v) => v,
        Err(msg) => return failure(StatusCode::BAD_REQUEST, &msg),
    };

    let data = readings::in_window(&state.readings, start, end);
    info!("Serving {} readings (filtered: {})", data.len(), filtered);

    Json(json!({ "status": "success", "data": data })).into_response()
}

fn parse_bound(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| format!("Invalid date '{}': {}", s, e))
    })
    .transpose()
}

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "status": "error", "message": message }))).into_response()
}
