//! # IIO Sysfs Sensor
//!
//! Reads processed values from the Linux Industrial I/O sysfs interface.
//!
//! Kernel drivers for common environmental chips (BME680, VEML6030, ...)
//! expose attributes such as `in_temp_input` or `in_illuminance_input`
//! under `/sys/bus/iio/devices/iio:deviceN/`. Each configured channel maps
//! one attribute file to one sample field, with a scale factor to convert
//! the driver's units (e.g. milli-degrees) into the payload's.

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use super::SensorSource;
use crate::error::Result;
use crate::reading::{Sample, SampleField};

/// One sysfs attribute mapped to a sample field
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IioChannel {
    pub field: SampleField,
    pub path: PathBuf,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 { 1.0 }

impl IioChannel {
    /// Read and scale the attribute. Unreadable or non-numeric values are absent.
    pub fn read(&self) -> Option<f64> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("IIO read failed for {}: {}", self.path.display(), e);
                return None;
            }
        };

        match raw.trim().parse::<f64>().map(|value| value * self.scale) {
            Ok(value) if value.is_finite() => Some(value),
            _ => {
                debug!(
                    "IIO value for {} is not a finite number after scaling: {:?}",
                    self.field,
                    raw.trim()
                );
                None
            }
        }
    }
}

/// Sensor source backed by IIO sysfs attributes
#[derive(Debug, Clone, Default)]
pub struct IioSensor {
    channels: Vec<IioChannel>,
}

impl IioSensor {
    pub fn new(channels: Vec<IioChannel>) -> Self {
        Self { channels }
    }

    pub fn channels(&self) -> &[IioChannel] {
        &self.channels
    }
}

impl SensorSource for IioSensor {
    fn read_sample(&mut self) -> Result<Sample> {
        let mut sample = Sample::default();
        for channel in &self.channels {
            if let Some(value) = channel.read() {
                sample.set(channel.field, Some(value));
            }
        }
        Ok(sample)
    }
}
