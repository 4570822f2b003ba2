use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TemperatureApiConfig;
use crate::errors::{Error, Result};
use crate::metrics::{
    RANGE_FALLBACKS_TOTAL, TEMPERATURE_FAILURES_TOTAL, TEMPERATURE_FETCHES_TOTAL,
    UPSTREAM_LATENCY_SECONDS,
};
use crate::model::{SensorReading, TemperatureEnvelope};
use crate::normalize::{average_of, filter_range, normalize_all};

const API_KEY_HEADER: &str = "x-api-key";
const SUCCESS_STATUS: &str = "success";
const UNKNOWN_API_ERROR: &str = "Unknown error from API";

/// Client for the soil temperature API.
///
/// Holds no state between calls, so concurrent and overlapping invocations
/// are independent of each other.
#[derive(Debug, Clone)]
pub struct TemperatureService {
    http: Client,
    url: String,
    api_key: String,
}

impl TemperatureService {
    pub fn new(config: TemperatureApiConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self::with_client(http, config.url, config.api_key))
    }

    pub fn with_client(http: Client, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| Error::Config(format!("Invalid API key header: {}", e)))?;
        headers.insert(API_KEY_HEADER, key);
        Ok(headers)
    }

    async fn get(&self, query: &[(&str, String)]) -> Result<Response> {
        TEMPERATURE_FETCHES_TOTAL.inc();
        let start = Instant::now();

        let result = self
            .http
            .get(&self.url)
            .headers(self.headers()?)
            .query(query)
            .send()
            .await;

        UPSTREAM_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        result.map_err(|e| {
            TEMPERATURE_FAILURES_TOTAL.inc();
            Error::Transport(e)
        })
    }

    /// Fetches all readings currently exposed by the API.
    pub async fn fetch_latest(&self) -> Result<Vec<SensorReading>> {
        debug!("Fetching temperature from {}", self.url);
        let response = self.get(&[]).await?;
        let readings = self.read_readings(response).await?;
        debug!("Received {} temperature readings", readings.len());
        Ok(readings)
    }

    /// Fetches readings with `start <= timestamp <= end`.
    ///
    /// The server is asked to filter first. If it rejects the parameters the
    /// unfiltered dataset is fetched instead. Either way the result is
    /// filtered again locally.
    pub async fn fetch_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>> {
        let query = [
            ("startDate", start.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ("endDate", end.to_rfc3339_opts(SecondsFormat::Millis, true)),
        ];
        debug!("Fetching temperature history {} to {}", query[0].1, query[1].1);

        let mut response = self.get(&query).await?;
        if !response.status().is_success() {
            warn!(
                "Date filter rejected with status {}, fetching all data",
                response.status()
            );
            RANGE_FALLBACKS_TOTAL.inc();
            response = self.get(&[]).await?;
        }

        let readings = self.read_readings(response).await?;
        let total = readings.len();
        let filtered = filter_range(readings, start, end);
        info!("Filtered {} records from {} total records", filtered.len(), total);
        Ok(filtered)
    }

    /// Mean temperature over the latest readings, `None` when there are none.
    pub async fn fetch_average(&self) -> Result<Option<f64>> {
        let readings = self.fetch_latest().await?;
        Ok(average_of(&readings))
    }

    async fn read_readings(&self, response: Response) -> Result<Vec<SensorReading>> {
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            TEMPERATURE_FAILURES_TOTAL.inc();
            Error::Transport(e)
        })?;

        if !status.is_success() {
            TEMPERATURE_FAILURES_TOTAL.inc();
            warn!("Temperature API responded with {}: {}", status, body);
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        parse_envelope(&body).inspect_err(|_| TEMPERATURE_FAILURES_TOTAL.inc())
    }
}

/// Decodes a `{status, data, message}` body into normalized readings.
pub fn parse_envelope(body: &str) -> Result<Vec<SensorReading>> {
    let envelope: TemperatureEnvelope = serde_json::from_str(body)?;

    if envelope.status != SUCCESS_STATUS {
        return Err(Error::ApiSemantic(
            envelope
                .message
                .unwrap_or_else(|| UNKNOWN_API_ERROR.to_string()),
        ));
    }

    Ok(normalize_all(envelope.data.unwrap_or_default()))
}
