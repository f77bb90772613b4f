//! # Sensor Module
//!
//! The sampling capability the publish loop reads once per tick.
//!
//! This module handles:
//! - The [`SensorSource`] trait hardware drivers plug into
//! - Combining several sources into one sample ([`MultiSensor`])
//! - Reading Linux IIO sysfs attributes ([`iio`])
//!
//! A measurement the hardware cannot provide this tick is reported as an
//! absent field, not as an error. An `Err` from a source means the source
//! itself broke.

pub mod iio;

use tracing::debug;

use crate::error::Result;
use crate::reading::Sample;

pub use iio::{IioChannel, IioSensor};

/// Trait for anything that can produce a [`Sample`]
#[cfg_attr(test, mockall::automock)]
pub trait SensorSource: Send {
    /// Take one sample. Must return within a bounded time.
    fn read_sample(&mut self) -> Result<Sample>;
}

impl<S: SensorSource + ?Sized> SensorSource for Box<S> {
    fn read_sample(&mut self) -> Result<Sample> {
        (**self).read_sample()
    }
}

/// Merges several sources into a single sample.
///
/// Sources are read in order; a later source's present fields overwrite an
/// earlier source's. A failing source contributes nothing for that tick.
#[derive(Default)]
pub struct MultiSensor {
    sources: Vec<Box<dyn SensorSource>>,
}

impl MultiSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source
    #[must_use]
    pub fn with_source(mut self, source: impl SensorSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl SensorSource for MultiSensor {
    fn read_sample(&mut self) -> Result<Sample> {
        let mut merged = Sample::default();

        for (index, source) in self.sources.iter_mut().enumerate() {
            match source.read_sample() {
                Ok(sample) => merged.merge(&sample),
                Err(e) => debug!("Sensor source {} failed: {}", index, e),
            }
        }

        Ok(merged)
    }
}
