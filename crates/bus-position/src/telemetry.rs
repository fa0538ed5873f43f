//! Telemetry data types
//!
//! Wire records as returned by the upstream vehicle tracking API and the
//! normalised [`RawTelemetrySample`] handed to the reconciler.

use chrono::{DateTime, Utc};
use realtime::{Result, invalid_sample, malformed_response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

/// Device connection status as reported upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Typed view of the free-form `attributes` object.
///
/// Every field is optional; unknown keys are ignored and a value of the
/// wrong type reads as absent. Distances are in metres as sent by the
/// device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetryAttributes {
    /// Vehicle is moving.
    #[serde(deserialize_with = "lenient")]
    pub motion: Option<bool>,

    /// Ignition on.
    #[serde(deserialize_with = "lenient")]
    pub ignition: Option<bool>,

    /// Distance covered today, in metres.
    #[serde(alias = "distanceToday", deserialize_with = "lenient")]
    pub today_distance: Option<f64>,

    /// Odometer, in metres.
    #[serde(deserialize_with = "lenient")]
    pub total_distance: Option<f64>,

    /// Stop index the upstream places the vehicle at.
    #[serde(deserialize_with = "lenient")]
    pub stop_index: Option<i64>,

    /// Coarse route progress in `[0, 1]`.
    #[serde(deserialize_with = "lenient")]
    pub progress: Option<f64>,

    /// Device battery, percent.
    #[serde(deserialize_with = "lenient")]
    pub battery_level: Option<f64>,

    /// Satellites in view.
    #[serde(deserialize_with = "lenient")]
    pub sat: Option<u32>,
}

/// One element of the upstream JSON array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub device_id: Option<String>,
    pub unique_id: Option<String>,
    pub name: Option<String>,
    pub model: Option<String>,
    pub category: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub valid: Option<bool>,

    /// Speed in knots.
    pub speed: Option<f64>,

    /// Heading in degrees.
    pub course: Option<f64>,
    pub status: Option<DeviceStatus>,

    #[serde(deserialize_with = "lenient_time")]
    pub fix_time: Option<DateTime<Utc>>,

    #[serde(deserialize_with = "lenient")]
    pub attributes: Option<TelemetryAttributes>,
}

/// A single position report for one bus slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTelemetrySample {
    /// Position of the record in the upstream array.
    pub slot: usize,

    /// Raw stop index; not yet clamped to the route.
    pub index: i64,
    pub device_id: Option<String>,
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,

    /// Speed in knots.
    pub speed: f64,

    /// Heading in degrees.
    pub heading: f64,
    pub valid: bool,
    pub status: DeviceStatus,
    pub attributes: TelemetryAttributes,
    pub fix_time: Option<DateTime<Utc>>,

    /// Fractional progress reported by the upstream, if any.
    pub reported_progress: Option<f64>,
}

impl RawTelemetrySample {
    /// Normalise a wire record. The stop index falls back to the slot when
    /// the upstream does not say which stop the vehicle is at.
    #[must_use]
    pub fn from_record(slot: usize, record: DeviceRecord) -> Self {
        let attributes = record.attributes.unwrap_or_default();
        let index = attributes.stop_index.unwrap_or_else(|| i64::try_from(slot).unwrap_or(i64::MAX));

        Self {
            slot,
            index,
            device_id: record.device_id.or(record.unique_id),
            name: record.name,
            latitude: record.latitude.unwrap_or_default(),
            longitude: record.longitude.unwrap_or_default(),
            speed: record.speed.unwrap_or_default(),
            heading: record.course.unwrap_or_default(),
            valid: record.valid.unwrap_or(false),
            status: record.status.unwrap_or_default(),
            reported_progress: attributes.progress,
            attributes,
            fix_time: record.fix_time,
        }
    }

    /// A valid, online sample at the given coordinates.
    #[must_use]
    pub fn at(slot: usize, latitude: f64, longitude: f64) -> Self {
        Self {
            slot,
            index: i64::try_from(slot).unwrap_or(i64::MAX),
            device_id: None,
            name: None,
            latitude,
            longitude,
            speed: 0.0,
            heading: 0.0,
            valid: true,
            status: DeviceStatus::Online,
            attributes: TelemetryAttributes::default(),
            fix_time: None,
            reported_progress: None,
        }
    }

    #[must_use]
    pub const fn with_index(mut self, index: i64) -> Self {
        self.index = index;
        self
    }

    #[must_use]
    pub const fn with_progress(mut self, progress: f64) -> Self {
        self.reported_progress = Some(progress);
        self
    }

    #[must_use]
    pub const fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    /// Check the sample carries a usable fix.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSample` when the fix is flagged invalid, sits on
    /// null island, or has coordinates out of range.
    pub fn validate(&self) -> Result<()> {
        if !self.valid {
            return Err(invalid_sample!("slot {} reported an invalid fix", self.slot));
        }
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(invalid_sample!("slot {} has non-finite coordinates", self.slot));
        }
        if self.latitude == 0.0 && self.longitude == 0.0 {
            return Err(invalid_sample!("slot {} reported (0, 0)", self.slot));
        }
        if self.latitude.abs() > 90.0 || self.longitude.abs() > 180.0 {
            return Err(invalid_sample!(
                "slot {} coordinates out of range: {}, {}",
                self.slot,
                self.latitude,
                self.longitude
            ));
        }
        Ok(())
    }
}

/// Parse an upstream response body into samples, one per non-null slot.
///
/// An element that is not a device record becomes an invalid sample for its
/// slot, so one broken device does not hide the others.
///
/// # Errors
///
/// Returns `Error::MalformedResponse` if the body is not a JSON array.
pub fn parse_positions(body: &[u8]) -> Result<Vec<RawTelemetrySample>> {
    let elements: Vec<Value> = serde_json::from_slice(body)
        .map_err(|e| malformed_response!("expected array of device records: {}", e))?;

    let samples = elements
        .into_iter()
        .enumerate()
        .filter(|(_, element)| !element.is_null())
        .map(|(slot, element)| match serde_json::from_value::<DeviceRecord>(element) {
            Ok(record) => RawTelemetrySample::from_record(slot, record),
            Err(e) => {
                debug!(slot, error = %e, "unreadable device record");
                RawTelemetrySample::from_record(slot, DeviceRecord::default())
            }
        })
        .collect();
    Ok(samples)
}

fn string_or_number<'de, D>(deserializer: D) -> anyhow::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Deserialize::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// Attribute values arrive as whatever the device firmware chose. Quoted
// scalars are unwrapped; anything still of the wrong type reads as absent.
fn lenient<'de, D, T>(deserializer: D) -> anyhow::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        Value::String(s) => serde_json::from_str(s.trim()).ok(),
        other => serde_json::from_value(other).ok(),
    })
}

// Devices occasionally send garbage timestamps; drop them rather than the
// whole response.
fn lenient_time<'de, D>(deserializer: D) -> anyhow::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(value.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const BODY: &str = r#"[
        {
            "id": 11,
            "deviceId": 7,
            "uniqueId": "867730050000001",
            "name": "Bus 1",
            "model": "GT06",
            "category": "bus",
            "latitude": 11.5412,
            "longitude": 75.6231,
            "valid": true,
            "speed": 10.0,
            "course": 182.5,
            "status": "online",
            "fixTime": "2024-03-04T05:06:07.000+00:00",
            "attributes": {
                "motion": true,
                "ignition": true,
                "todayDistance": 12345.678,
                "totalDistance": 9876543.21,
                "batteryLevel": 87,
                "sat": 9,
                "hours": 123456
            }
        },
        null,
        {
            "deviceId": "bus-3",
            "latitude": 0.0,
            "longitude": 0.0,
            "valid": false,
            "status": "weird",
            "fixTime": "yesterday",
            "attributes": { "stopIndex": 4, "progress": 0.6 }
        }
    ]"#;

    #[test]
    fn parses_slots() {
        let samples = parse_positions(BODY.as_bytes()).expect("should parse");
        assert_eq!(samples.len(), 2);

        let first = &samples[0];
        assert_eq!(first.slot, 0);
        assert_eq!(first.index, 0);
        assert_eq!(first.device_id.as_deref(), Some("7"));
        assert_eq!(first.status, DeviceStatus::Online);
        assert_eq!(first.attributes.motion, Some(true));
        assert_eq!(first.attributes.sat, Some(9));
        assert!(first.fix_time.is_some());
        assert!(first.validate().is_ok());

        let third = &samples[1];
        assert_eq!(third.slot, 2);
        assert_eq!(third.index, 4);
        assert_eq!(third.reported_progress, Some(0.6));
        assert_eq!(third.device_id.as_deref(), Some("bus-3"));
        assert_eq!(third.status, DeviceStatus::Unknown);
        assert_eq!(third.fix_time, None);
    }

    #[test]
    fn missing_fields_default() {
        let samples = parse_positions(b"[{}]").expect("should parse");
        let sample = &samples[0];
        assert!(!sample.valid);
        assert_eq!(sample.attributes, TelemetryAttributes::default());
        assert_eq!(sample.validate().unwrap_err().code(), "invalid_sample");
    }

    #[test]
    fn object_is_malformed() {
        let err = parse_positions(br#"{"error": "unauthorised"}"#).unwrap_err();
        assert_eq!(err.code(), "malformed_response");

        let err = parse_positions(b"<html>").unwrap_err();
        assert_eq!(err.code(), "malformed_response");
    }

    #[test]
    fn mistyped_attributes_read_leniently() {
        let body = r#"[{
            "latitude": 11.54,
            "longitude": 75.62,
            "valid": true,
            "attributes": {
                "sat": "9",
                "motion": "true",
                "ignition": "yes",
                "stopIndex": "3",
                "progress": [0.5],
                "todayDistance": {"m": 10}
            }
        }]"#;

        let samples = parse_positions(body.as_bytes()).expect("should parse");
        let attributes = &samples[0].attributes;
        assert_eq!(attributes.sat, Some(9));
        assert_eq!(attributes.motion, Some(true));
        assert_eq!(attributes.ignition, None);
        assert_eq!(attributes.stop_index, Some(3));
        assert_eq!(attributes.progress, None);
        assert_eq!(attributes.today_distance, None);
        assert_eq!(samples[0].index, 3);
        assert!(samples[0].validate().is_ok());
    }

    #[test]
    fn non_object_attributes_ignored() {
        let body = br#"[{"latitude": 11.54, "longitude": 75.62, "valid": true, "attributes": "n/a"}]"#;
        let samples = parse_positions(body).expect("should parse");
        assert_eq!(samples[0].attributes, TelemetryAttributes::default());
        assert!(samples[0].validate().is_ok());
    }

    #[test]
    fn broken_element_keeps_other_slots() {
        let body = br#"[
            {"latitude": "north", "longitude": 75.62, "valid": true},
            {"latitude": 11.56, "longitude": 75.65, "valid": true},
            42
        ]"#;

        let samples = parse_positions(body).expect("should parse");
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].validate().unwrap_err().code(), "invalid_sample");
        assert!(samples[1].validate().is_ok());
        assert_eq!(samples[2].slot, 2);
        assert!(!samples[2].valid);
    }

    #[test]
    fn rejects_null_island() {
        let sample = RawTelemetrySample::at(0, 0.0, 0.0);
        assert!(sample.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(RawTelemetrySample::at(0, 91.0, 10.0).validate().is_err());
        assert!(RawTelemetrySample::at(0, 10.0, f64::NAN).validate().is_err());
        assert!(RawTelemetrySample::at(0, 11.54, 75.62).invalid().validate().is_err());
    }
}
