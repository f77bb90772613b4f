//! # Bounded Direct-Send Retry
//!
//! Wraps a [`Transport`] with a fixed number of attempts and a jittered
//! exponential wait between them.
//!
//! The wait before attempt `n + 1` is
//! `min(max_delay, base_delay * 2^(n - 1)) * U(0.5, 1.0)`.
//!
//! Only the direct send of the fresh reading goes through this wrapper. The
//! offline queue flush keeps its own stop-on-first-failure policy and always
//! uses the bare transport.

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

use super::{is_success, Transport};
use crate::error::Result;
use crate::reading::Reading;

/// Retry limits for the direct send
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_attempt()
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }

    /// Un-jittered wait after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Wait after the given failed attempt scaled by `jitter` (clamped to 0.5..=1.0)
    pub fn jittered_backoff(&self, attempt: u32, jitter: f64) -> Duration {
        self.backoff(attempt).mul_f64(jitter.clamp(0.5, 1.0))
    }
}

/// Transport decorator that retries failed attempts
#[derive(Debug, Clone)]
pub struct RetryingSender<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingSender<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Bare transport, for callers that must not retry
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryingSender<T> {
    async fn send(&self, reading: &Reading) -> Result<u16> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = self.inner.send(reading).await;
            let retryable = match &result {
                Ok(code) => !is_success(*code),
                Err(_) => true,
            };
            if !retryable || attempt >= max_attempts {
                return result;
            }

            let jitter = rand::thread_rng().gen_range(0.5..=1.0);
            let wait = self.policy.jittered_backoff(attempt, jitter);
            match &result {
                Ok(code) => debug!(attempt, status = code, ?wait, "Direct send rejected; retrying"),
                Err(e) => debug!(attempt, error = %e, ?wait, "Direct send failed; retrying"),
            }
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}
