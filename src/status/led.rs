//! # LED Status Indicator
//!
//! Drives a sysfs LED (the Pi's `PWR` LED by default):
//!
//! - **Off**: `trigger=none`, `brightness=0` (normal operation)
//! - **Blink**: `trigger=timer` with `delay_on`/`delay_off` in ms (delivery trouble)
//!
//! Boards without the LED class directory are tolerated. The missing path is
//! reported once at debug level and every later call is a no-op.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::StatusHooks;
use crate::error::{PublisherError, Result};

/// Default LED class directory
pub const DEFAULT_LED_BASE: &str = "/sys/class/leds/PWR";

/// Sysfs LED controller
#[derive(Debug)]
pub struct LedIndicator {
    base: PathBuf,
    blink_on_ms: u64,
    blink_off_ms: u64,
    warned_unavailable: AtomicBool,
}

impl LedIndicator {
    pub fn new(base: impl Into<PathBuf>, blink_on_ms: u64, blink_off_ms: u64) -> Self {
        Self {
            base: base.into(),
            blink_on_ms,
            blink_off_ms,
            warned_unavailable: AtomicBool::new(false),
        }
    }

    /// LED class directory this indicator writes to
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn available(&self) -> bool {
        if self.base.join("trigger").exists() {
            return true;
        }
        if !self.warned_unavailable.swap(true, Ordering::Relaxed) {
            debug!("LED sysfs not available at {}", self.base.display());
        }
        false
    }

    fn write(&self, attribute: &str, value: &str) -> Result<()> {
        let path = self.base.join(attribute);
        fs::write(&path, value).map_err(|e| {
            PublisherError::Hook(format!("LED write {} -> {} failed: {}", path.display(), value, e))
        })
    }

    /// Turn the LED off. Returns `Ok(false)` when the LED is not present.
    pub fn off(&self) -> Result<bool> {
        if !self.available() {
            return Ok(false);
        }
        self.write("trigger", "none")?;
        self.write("brightness", "0")?;
        Ok(true)
    }

    /// Start kernel timer blinking. Returns `Ok(false)` when the LED is not present.
    pub fn blink(&self) -> Result<bool> {
        if !self.available() {
            return Ok(false);
        }
        self.write("trigger", "timer")?;
        self.write("delay_on", &self.blink_on_ms.to_string())?;
        self.write("delay_off", &self.blink_off_ms.to_string())?;
        Ok(true)
    }

    /// Status hooks wired to this LED.
    ///
    /// Send success turns it off, send failure blinks, a flush that delivered
    /// something turns it off, a flush error blinks.
    pub fn into_hooks(self: Arc<Self>) -> StatusHooks {
        let (a, b, c, d) = (self.clone(), self.clone(), self.clone(), self);

        StatusHooks::new()
            .on_send_success(move || a.off().map(|_| ()))
            .on_send_failure(move |_| b.blink().map(|_| ()))
            .on_flush_success(move |flushed| {
                if flushed > 0 {
                    c.off()?;
                }
                Ok(())
            })
            .on_flush_error(move |_| d.blink().map(|_| ()))
    }
}
