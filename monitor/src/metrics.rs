use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref TEMPERATURE_FETCHES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_temperature_fetches_total",
        "Total requests made to the temperature API"
    ))
    .unwrap();
    pub static ref TEMPERATURE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_temperature_failures_total",
        "Total temperature fetches that ended in an error"
    ))
    .unwrap();
    pub static ref RANGE_FALLBACKS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_range_fallbacks_total",
        "Total range queries that fell back to an unfiltered fetch"
    ))
    .unwrap();
    pub static ref TOKEN_REFRESHES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_token_refreshes_total",
        "Total token exchanges performed against the device platform"
    ))
    .unwrap();
    pub static ref DEVICE_REQUESTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_device_requests_total",
        "Total signed requests sent to the device platform"
    ))
    .unwrap();
    pub static ref DEVICE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_device_failures_total",
        "Total device platform requests that returned an error"
    ))
    .unwrap();
    pub static ref UPSTREAM_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "monitor_upstream_latency_seconds",
            "Time taken by upstream HTTP calls"
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    )
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(TEMPERATURE_FETCHES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TEMPERATURE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RANGE_FALLBACKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TOKEN_REFRESHES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEVICE_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEVICE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_LATENCY_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
