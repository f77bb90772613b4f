//! # Readings
//!
//! Sensor samples and the delivery payload built from them.
//!
//! A [`Sample`] is what the sensor capability hands back once per tick: six
//! optional measurements, where `None` means "not available this tick".
//! A [`Reading`] is the unit of delivery. It is stamped with the sampling
//! minute and the device identifier, and its JSON form omits every absent
//! measurement:
//!
//! ```text
//! { "day": "YYYY-MM-DD", "ts_min": <int>, "deviceId": "<string>",
//!   "temp_c"?: <float>, "humidity_pct"?: <float>, "pressure_hpa"?: <float>,
//!   "ambient_lux"?: <float>, "iaq"?: <float>, "noise_db"?: <float> }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds per minute, used to truncate wall-clock time to `ts_min`
const SECONDS_PER_MINUTE: i64 = 60;

/// Measurement keys a sensor source can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SampleField {
    #[serde(rename = "temperature_c")]
    Temperature,
    #[serde(rename = "humidity_pct")]
    Humidity,
    #[serde(rename = "pressure_hpa")]
    Pressure,
    #[serde(rename = "ambient_lux")]
    AmbientLux,
    #[serde(rename = "iaq")]
    Iaq,
    #[serde(rename = "noise_db")]
    NoiseDb,
}

impl SampleField {
    /// All fields, in payload order
    pub const ALL: [SampleField; 6] = [
        SampleField::Temperature,
        SampleField::Humidity,
        SampleField::Pressure,
        SampleField::AmbientLux,
        SampleField::Iaq,
        SampleField::NoiseDb,
    ];

    /// Key used by sensor sources for this field
    pub fn key(self) -> &'static str {
        match self {
            SampleField::Temperature => "temperature_c",
            SampleField::Humidity => "humidity_pct",
            SampleField::Pressure => "pressure_hpa",
            SampleField::AmbientLux => "ambient_lux",
            SampleField::Iaq => "iaq",
            SampleField::NoiseDb => "noise_db",
        }
    }

    /// Parse a sensor key such as `"temperature_c"`
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }
}

impl fmt::Display for SampleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One tick's worth of measurements
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sample {
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub ambient_lux: Option<f64>,
    pub iaq: Option<f64>,
    pub noise_db: Option<f64>,
}

impl Sample {
    /// Read a single field
    pub fn get(&self, field: SampleField) -> Option<f64> {
        match field {
            SampleField::Temperature => self.temperature_c,
            SampleField::Humidity => self.humidity_pct,
            SampleField::Pressure => self.pressure_hpa,
            SampleField::AmbientLux => self.ambient_lux,
            SampleField::Iaq => self.iaq,
            SampleField::NoiseDb => self.noise_db,
        }
    }

    /// Set a single field
    pub fn set(&mut self, field: SampleField, value: Option<f64>) {
        let slot = match field {
            SampleField::Temperature => &mut self.temperature_c,
            SampleField::Humidity => &mut self.humidity_pct,
            SampleField::Pressure => &mut self.pressure_hpa,
            SampleField::AmbientLux => &mut self.ambient_lux,
            SampleField::Iaq => &mut self.iaq,
            SampleField::NoiseDb => &mut self.noise_db,
        };
        *slot = value;
    }

    /// Overlay the present fields of `other` onto `self`.
    ///
    /// Absent fields in `other` never clear a value already present.
    pub fn merge(&mut self, other: &Sample) {
        for field in SampleField::ALL {
            if let Some(value) = other.get(field) {
                self.set(field, Some(value));
            }
        }
    }

    /// True when no measurement is present
    pub fn is_empty(&self) -> bool {
        SampleField::ALL.iter().all(|field| self.get(*field).is_none())
    }
}

/// The delivery payload for one device at one minute.
///
/// `(device_id, ts_min)` is the natural key; two readings sharing it are
/// duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub day: String,
    pub ts_min: i64,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure_hpa: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambient_lux: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iaq: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_db: Option<f64>,
}

impl Reading {
    /// Dedupe key `(device_id, ts_min)`
    pub fn key(&self) -> (&str, i64) {
        (&self.device_id, self.ts_min)
    }
}

/// Build the payload for a sample taken at `now`
pub fn build_reading(sample: &Sample, device_id: &str, now: DateTime<Utc>) -> Reading {
    let ts_min = now.timestamp().div_euclid(SECONDS_PER_MINUTE);

    Reading {
        day: day_from_epoch_minutes(ts_min),
        ts_min,
        device_id: device_id.to_string(),
        temp_c: finite(sample.temperature_c),
        humidity_pct: finite(sample.humidity_pct),
        pressure_hpa: finite(sample.pressure_hpa),
        ambient_lux: finite(sample.ambient_lux),
        iaq: finite(sample.iaq),
        noise_db: finite(sample.noise_db),
    }
}

// serde_json writes NaN and infinities as null; such values are absent instead
fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// UTC calendar day (`YYYY-MM-DD`) containing the given epoch minute.
///
/// Returns an empty string for minutes outside chrono's representable range.
pub fn day_from_epoch_minutes(ts_min: i64) -> String {
    ts_min
        .checked_mul(SECONDS_PER_MINUTE)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}
