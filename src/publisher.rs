//! # Publish Loop
//!
//! The long-running loop that samples, recovers backlog, and delivers.
//!
//! Each tick:
//! 1. Take one [`Sample`](crate::reading::Sample) from the sensor source
//! 2. Build a [`Reading`] stamped with the current minute and device id
//! 3. Flush up to `flush_batch` queued readings through the bare transport
//!    (stops at the first failure; errors only reach the flush-error hook)
//! 4. Send the fresh reading directly; on failure, queue it for later
//! 5. Sleep for the tick interval
//!
//! Before the first tick, an optional warm-up delay runs exactly once.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{PublisherError, Result};
use crate::queue::OfflineQueue;
use crate::reading::{build_reading, Reading};
use crate::sender::{is_success, RetryingSender, Transport};
use crate::sensor::SensorSource;
use crate::status::StatusHooks;

/// Wall-clock source used to stamp readings
pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

/// Real UTC clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Loop timing and batch size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublisherSettings {
    pub tick_interval: Duration,
    pub warmup: Duration,
    pub flush_batch: usize,
}

impl PublisherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            warmup: config.warmup(),
            flush_batch: config.spool.flush_batch,
        }
    }
}

/// What happened during one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub reading: Reading,
    /// Backlog entries delivered, or `None` if the flush hit a storage error
    pub flushed: Option<usize>,
    /// The fresh reading was acknowledged with a 2xx
    pub delivered: bool,
    /// The fresh reading was handed to the offline queue after a failed send
    pub queued: bool,
}

/// Sampling and delivery loop.
///
/// Owns the offline queue for the lifetime of the process. The direct send
/// goes through the [`RetryingSender`]; backlog flushing uses its bare inner
/// transport so the queue keeps its stop-on-first-failure behaviour.
pub struct Publisher<S, T, C = SystemClock> {
    sensor: S,
    sender: RetryingSender<T>,
    queue: OfflineQueue,
    hooks: StatusHooks,
    clock: C,
    device_id: String,
    settings: PublisherSettings,
    first_sent: bool,
}

impl<S, T> Publisher<S, T, SystemClock>
where
    S: SensorSource,
    T: Transport,
{
    pub fn new(
        sensor: S,
        sender: RetryingSender<T>,
        queue: OfflineQueue,
        hooks: StatusHooks,
        device_id: impl Into<String>,
        settings: PublisherSettings,
    ) -> Self {
        Self {
            sensor,
            sender,
            queue,
            hooks,
            clock: SystemClock,
            device_id: device_id.into(),
            settings,
            first_sent: false,
        }
    }
}

impl<S, T, C> Publisher<S, T, C>
where
    S: SensorSource,
    T: Transport,
    C: Clock,
{
    /// Replace the clock used to stamp readings
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Publisher<S, T, C2> {
        Publisher {
            sensor: self.sensor,
            sender: self.sender,
            queue: self.queue,
            hooks: self.hooks,
            clock,
            device_id: self.device_id,
            settings: self.settings,
            first_sent: self.first_sent,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    /// Run the warm-up once, then tick forever.
    ///
    /// # Errors
    ///
    /// Only a failing sensor source ends the loop. Delivery and storage
    /// failures are logged and reported through the status hooks.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Publisher starting: tick={}s, warmup={}s, device={}",
            self.settings.tick_interval.as_secs(),
            self.settings.warmup.as_secs(),
            self.device_id
        );

        if !self.settings.warmup.is_zero() {
            info!("Warming up sensors for {}s...", self.settings.warmup.as_secs());
            tokio::time::sleep(self.settings.warmup).await;
            info!(
                "Warmup complete; starting sampling every {}s",
                self.settings.tick_interval.as_secs()
            );
        }

        loop {
            self.tick().await?;
            tokio::time::sleep(self.settings.tick_interval).await;
        }
    }

    /// One sample → flush → send → (enqueue) pass, without sleeping
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let sample = self.sensor.read_sample()?;
        let reading = build_reading(&sample, &self.device_id, self.clock.now());

        let flushed = self.flush_backlog().await;
        let delivered = self.send_direct(&reading).await;
        let queued = !delivered && self.enqueue(&reading);

        Ok(TickOutcome {
            reading,
            flushed,
            delivered,
            queued,
        })
    }

    async fn flush_backlog(&mut self) -> Option<usize> {
        match self
            .queue
            .flush_once(self.settings.flush_batch, self.sender.inner())
            .await
        {
            Ok(flushed) => {
                if flushed > 0 {
                    info!("Flushed {} queued samples", flushed);
                }
                self.hooks.flush_succeeded(flushed);
                Some(flushed)
            }
            Err(e) => {
                debug!("Flush attempt failed: {}", e);
                self.hooks.flush_failed(&e);
                None
            }
        }
    }

    async fn send_direct(&mut self, reading: &Reading) -> bool {
        info!(ts_min = reading.ts_min, "Sending sample: {:?}", reading);

        let result = match self.sender.send(reading).await {
            Ok(code) if is_success(code) => Ok(()),
            Ok(code) => Err(PublisherError::Rejected(code)),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                if !self.first_sent {
                    info!(
                        "First sample sent: temp={:?}C hum={:?}% pres={:?}hPa",
                        reading.temp_c, reading.humidity_pct, reading.pressure_hpa
                    );
                    self.first_sent = true;
                }
                self.hooks.send_succeeded();
                true
            }
            Err(e) => {
                warn!("Send failed; enqueuing for retry: {}", e);
                self.hooks.send_failed(&e);
                false
            }
        }
    }

    fn enqueue(&mut self, reading: &Reading) -> bool {
        match self.queue.enqueue(reading) {
            Ok(_) => {
                info!("Queued sample for later retry: ts_min={}", reading.ts_min);
                true
            }
            Err(e) => {
                error!("Failed to enqueue payload for retry: {}", e);
                false
            }
        }
    }

    /// Release the offline queue's database
    pub fn close(self) -> Result<()> {
        self.queue.close()
    }
}
