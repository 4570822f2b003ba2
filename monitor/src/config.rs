use std::time::Duration;

use clap::Parser;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Parser)]
#[command(name = "monitor", about = "Soil temperature and breaker monitoring backend")]
pub struct Config {
    /// Temperature sensor API endpoint
    #[arg(
        long,
        env = "TEMPERATURE_API_URL",
        default_value = "http://localhost:8081/api/temperatures"
    )]
    pub temperature_api_url: String,

    /// Static key sent as X-API-Key
    #[arg(long, env = "TEMPERATURE_API_KEY", hide_env_values = true)]
    pub temperature_api_key: String,

    #[arg(long, env = "TUYA_BASE_URL", default_value = "https://openapi.tuyaus.com")]
    pub tuya_base_url: String,

    #[arg(long, env = "TUYA_CLIENT_ID")]
    pub tuya_client_id: String,

    #[arg(long, env = "TUYA_CLIENT_SECRET", hide_env_values = true)]
    pub tuya_client_secret: String,

    /// Project (user) code used to list devices
    #[arg(long, env = "TUYA_PROJECT_CODE")]
    pub tuya_project_code: String,

    /// Breaker device to read. Auto-detected when absent.
    #[arg(long, env = "TUYA_DEVICE_ID")]
    pub tuya_device_id: Option<String>,

    #[arg(long, env = "POLLING_INTERVAL_MS", default_value_t = 30_000)]
    pub polling_interval_ms: u64,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,
}

/// Settings for the statically keyed temperature API.
#[derive(Clone)]
pub struct TemperatureApiConfig {
    pub url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for TemperatureApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemperatureApiConfig")
            .field("url", &self.url)
            .field("api_key", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Settings for the signed device platform API.
#[derive(Clone)]
pub struct DeviceApiConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub project_code: String,
    pub device_id: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for DeviceApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceApiConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("project_code", &self.project_code)
            .field("device_id", &self.device_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.polling_interval_ms == 0 {
            return Err(Error::Config(
                "Polling interval must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }
        if self.temperature_api_url.is_empty() || self.tuya_base_url.is_empty() {
            return Err(Error::Config("API URLs cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn temperature_api(&self) -> TemperatureApiConfig {
        TemperatureApiConfig {
            url: self.temperature_api_url.clone(),
            api_key: self.temperature_api_key.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn device_api(&self) -> DeviceApiConfig {
        DeviceApiConfig {
            base_url: self.tuya_base_url.trim_end_matches('/').to_string(),
            client_id: self.tuya_client_id.clone(),
            client_secret: self.tuya_client_secret.clone(),
            project_code: self.tuya_project_code.clone(),
            device_id: self.tuya_device_id.clone().filter(|id| !id.is_empty()),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Config {
        let mut args = vec![
            "monitor",
            "--temperature-api-key",
            "key",
            "--tuya-client-id",
            "cid",
            "--tuya-client-secret",
            "secret",
            "--tuya-project-code",
            "proj",
        ];
        args.extend_from_slice(extra);
        Config::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.polling_interval(), Duration::from_secs(30));
        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert!(config.tuya_device_id.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = parse(&["--polling-interval-ms", "0"]);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_device_api_trims_base_url() {
        let config = parse(&["--tuya-base-url", "https://example.test/", "--tuya-device-id", ""]);
        let device = config.device_api();
        assert_eq!(device.base_url, "https://example.test");
        assert!(device.device_id.is_none());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = parse(&[]);
        let rendered = format!("{:?} {:?}", config.device_api(), config.temperature_api());
        assert!(!rendered.contains("\"secret\""));
        assert!(!rendered.contains("\"key\""));
    }
}
