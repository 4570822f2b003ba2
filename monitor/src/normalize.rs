use chrono::{DateTime, Utc};
use tracing::warn;

use crate::model::{RawReading, SensorReading};

/// Maps an upstream record onto the canonical reading shape.
///
/// `time` wins over `timestamp` when both are present. Returns `None` when the
/// record carries neither, or when its temperature is not a number. Numeric
/// strings such as `"23.4"` are accepted.
pub fn normalize_reading(raw: RawReading) -> Option<SensorReading> {
    let temperature_celsius = match &raw.temperature {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|t| t.is_finite())?;

    let timestamp_iso = raw
        .time
        .filter(|t| !t.is_empty())
        .or(raw.timestamp.filter(|t| !t.is_empty()))?;

    let id = raw.id.and_then(|id| match id {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    });

    Some(SensorReading {
        id,
        temperature_celsius,
        timestamp_iso,
        location: raw.location,
        sensor_id: raw.sensor_id,
    })
}

/// Normalizes a batch, dropping records without a timestamp or a usable
/// temperature.
pub fn normalize_all(raw: Vec<RawReading>) -> Vec<SensorReading> {
    let total = raw.len();
    let readings: Vec<SensorReading> = raw.into_iter().filter_map(normalize_reading).collect();

    if readings.len() < total {
        warn!(
            "Dropped {} of {} readings without a timestamp or temperature",
            total - readings.len(),
            total
        );
    }

    readings
}

/// Keeps readings with `start <= timestamp <= end`. Readings whose timestamp
/// does not parse are excluded.
pub fn filter_range(
    readings: Vec<SensorReading>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<SensorReading> {
    readings
        .into_iter()
        .filter(|r| match parse_timestamp(&r.timestamp_iso) {
            Some(ts) => ts >= start && ts <= end,
            None => false,
        })
        .collect()
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Arithmetic mean of the temperatures, `None` for an empty slice.
pub fn average_of(readings: &[SensorReading]) -> Option<f64> {
    if readings.is_empty() {
        return None;
    }
    let sum: f64 = readings.iter().map(|r| r.temperature_celsius).sum();
    Some(sum / readings.len() as f64)
}

/// Most recent reading as ordered by the upstream (last element).
pub fn latest_of(readings: &[SensorReading]) -> Option<&SensorReading> {
    readings.last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn raw(time: Option<&str>, timestamp: Option<&str>) -> RawReading {
        RawReading {
            id: None,
            temperature: serde_json::json!(25.0),
            time: time.map(str::to_string),
            timestamp: timestamp.map(str::to_string),
            location: None,
            sensor_id: None,
        }
    }

    fn reading_at(ts: DateTime<Utc>, temperature: f64) -> SensorReading {
        SensorReading {
            id: None,
            temperature_celsius: temperature,
            timestamp_iso: ts.to_rfc3339(),
            location: None,
            sensor_id: None,
        }
    }

    #[test]
    fn test_time_takes_precedence() {
        let reading = normalize_reading(raw(
            Some("2024-01-01T00:00:00Z"),
            Some("2099-01-01T00:00:00Z"),
        ))
        .unwrap();
        assert_eq!(reading.timestamp_iso, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_empty_time_falls_back_to_timestamp() {
        let reading = normalize_reading(raw(Some(""), Some("2024-03-01T00:00:00Z"))).unwrap();
        assert_eq!(reading.timestamp_iso, "2024-03-01T00:00:00Z");
    }

    #[test]
    fn test_missing_timestamp_is_dropped() {
        assert!(normalize_reading(raw(None, None)).is_none());
        assert_eq!(normalize_all(vec![raw(None, None), raw(Some("2024-01-01T00:00:00Z"), None)]).len(), 1);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let canonical = SensorReading {
            id: Some("r-1".to_string()),
            temperature_celsius: 21.5,
            timestamp_iso: "2024-05-05T12:00:00Z".to_string(),
            location: Some("greenhouse".to_string()),
            sensor_id: Some("s-7".to_string()),
        };

        // A canonical reading has no `time` field; feeding it back through
        // the upstream shape must not change it.
        let json = serde_json::to_string(&canonical).unwrap();
        let again: RawReading = serde_json::from_str(&json).unwrap();
        assert!(again.time.is_none());
        assert_eq!(normalize_reading(again).unwrap(), canonical);
    }

    #[test]
    fn test_unusable_temperature_is_dropped() {
        let mut null_temp = raw(Some("2024-01-01T00:00:00Z"), None);
        null_temp.temperature = serde_json::Value::Null;
        let mut text_temp = raw(Some("2024-01-01T00:00:00Z"), None);
        text_temp.temperature = serde_json::json!("warm");
        let mut numeric_text = raw(Some("2024-01-01T00:00:00Z"), None);
        numeric_text.temperature = serde_json::json!("23.4");

        assert!(normalize_reading(null_temp.clone()).is_none());
        assert!(normalize_reading(text_temp.clone()).is_none());
        assert_eq!(
            normalize_reading(numeric_text.clone()).unwrap().temperature_celsius,
            23.4
        );

        let kept = normalize_all(vec![null_temp, text_temp, numeric_text, raw(Some("2024-01-02T00:00:00Z"), None)]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_numeric_id_becomes_string() {
        let mut record = raw(Some("2024-01-01T00:00:00Z"), None);
        record.id = Some(serde_json::json!(42));
        assert_eq!(normalize_reading(record).unwrap().id.as_deref(), Some("42"));
    }

    #[test]
    fn test_filter_range_is_inclusive() {
        let t = "2024-06-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let readings = vec![
            reading_at(t - Duration::hours(2), 20.0),
            reading_at(t - Duration::hours(1), 21.0),
            reading_at(t, 22.0),
            reading_at(t + Duration::hours(1), 23.0),
        ];

        let filtered = filter_range(readings, t - Duration::hours(1), t);
        let temps: Vec<f64> = filtered.iter().map(|r| r.temperature_celsius).collect();
        assert_eq!(temps, vec![21.0, 22.0]);
    }

    #[test]
    fn test_filter_range_excludes_unparseable() {
        let t = Utc::now();
        let mut bad = reading_at(t, 20.0);
        bad.timestamp_iso = "yesterday".to_string();
        assert!(filter_range(vec![bad], t - Duration::hours(1), t + Duration::hours(1)).is_empty());
    }

    #[test]
    fn test_average_of_empty() {
        assert_eq!(average_of(&[]), None);
    }

    #[test]
    fn test_average_and_latest() {
        let t = Utc::now();
        let readings = vec![reading_at(t, 20.0), reading_at(t, 22.0), reading_at(t, 27.0)];
        assert_eq!(average_of(&readings), Some(23.0));
        assert_eq!(latest_of(&readings).unwrap().temperature_celsius, 27.0);
    }
}
