use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;

/// One soil reading as the upstream temperature API emits it. Older
/// firmware reports `timestamp`, newer firmware reports `time`.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub id: u64,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub location: String,
    #[serde(rename = "sensorId")]
    pub sensor_id: String,
}

impl Reading {
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        self.time.or(self.timestamp)
    }
}

/// Readings spaced `interval` apart covering `[end - span, end]`, oldest first.
pub fn generate_series(
    rng: &mut impl Rng,
    end: DateTime<Utc>,
    span: Duration,
    interval: Duration,
) -> Vec<Reading> {
    let mut readings = Vec::new();
    if interval <= Duration::zero() {
        return readings;
    }

    let mut at = end - span;
    let mut id = 1u64;
    while at <= end {
        readings.push(generate_reading(rng, id, at));
        at += interval;
        id += 1;
    }
    readings
}

pub fn generate_reading(rng: &mut impl Rng, id: u64, at: DateTime<Utc>) -> Reading {
    let temperature = if rng.gen_bool(0.05) {
        rng.gen_range(5.0..45.0) // 5% outliers
    } else {
        rng.gen_range(20.0..32.0)
    };
    let temperature = (temperature * 10.0_f64).round() / 10.0;

    let (time, timestamp) = if id % 2 == 0 {
        (None, Some(at))
    } else {
        (Some(at), None)
    };

    Reading {
        id,
        temperature,
        time,
        timestamp,
        location: "greenhouse-1".to_string(),
        sensor_id: format!("soil-{}", rng.gen_range(1..=4)),
    }
}

/// Inclusive on both ends. Either bound may be absent.
pub fn in_window(
    readings: &[Reading],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<Reading> {
    readings
        .iter()
        .filter(|r| match r.recorded_at() {
            Some(at) => start.map_or(true, |s| at >= s) && end.map_or(true, |e| at <= e),
            None => false,
        })
        .cloned()
        .collect()
}
