//! # Status Module
//!
//! Best-effort hooks the publish loop fires for observability.
//!
//! This module handles:
//! - Four optional hook points: send success, send failure, flush success,
//!   flush error
//! - Guarded invocation: a hook that returns an error or panics is logged at
//!   debug level and otherwise ignored
//!
//! Hooks should report failure by returning `Err`. A panic is contained, but
//! the process panic hook still runs first and prints the panic message to
//! stderr.
//! - The sysfs power LED indicator ([`led`])

pub mod led;

use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

use crate::error::{PublisherError, Result};

pub use led::LedIndicator;

type Hook = Box<dyn FnMut() -> Result<()> + Send>;
type ErrorHook = Box<dyn FnMut(&PublisherError) -> Result<()> + Send>;
type CountHook = Box<dyn FnMut(usize) -> Result<()> + Send>;

/// Optional status callbacks
#[derive(Default)]
pub struct StatusHooks {
    on_send_success: Option<Hook>,
    on_send_failure: Option<ErrorHook>,
    on_flush_success: Option<CountHook>,
    on_flush_error: Option<ErrorHook>,
}

impl std::fmt::Debug for StatusHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusHooks")
            .field("on_send_success", &self.on_send_success.is_some())
            .field("on_send_failure", &self.on_send_failure.is_some())
            .field("on_flush_success", &self.on_flush_success.is_some())
            .field("on_flush_error", &self.on_flush_error.is_some())
            .finish()
    }
}

impl StatusHooks {
    /// No hooks installed
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_send_success<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        self.on_send_success = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn on_send_failure<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&PublisherError) -> Result<()> + Send + 'static,
    {
        self.on_send_failure = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn on_flush_success<F>(mut self, hook: F) -> Self
    where
        F: FnMut(usize) -> Result<()> + Send + 'static,
    {
        self.on_flush_success = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn on_flush_error<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&PublisherError) -> Result<()> + Send + 'static,
    {
        self.on_flush_error = Some(Box::new(hook));
        self
    }

    pub fn send_succeeded(&mut self) {
        if let Some(hook) = self.on_send_success.as_mut() {
            guarded("on_send_success", || hook());
        }
    }

    pub fn send_failed(&mut self, error: &PublisherError) {
        if let Some(hook) = self.on_send_failure.as_mut() {
            guarded("on_send_failure", || hook(error));
        }
    }

    pub fn flush_succeeded(&mut self, flushed: usize) {
        if let Some(hook) = self.on_flush_success.as_mut() {
            guarded("on_flush_success", || hook(flushed));
        }
    }

    pub fn flush_failed(&mut self, error: &PublisherError) {
        if let Some(hook) = self.on_flush_error.as_mut() {
            guarded("on_flush_error", || hook(error));
        }
    }
}

/// Run a hook so that neither its error nor its panic reaches the caller.
///
/// `catch_unwind` does not suppress the installed panic hook, so a panicking
/// hook is still reported on stderr before it is logged here.
fn guarded<F>(name: &str, hook: F)
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("{} callback error: {}", name, e),
        Err(_) => debug!("{} callback panicked", name),
    }
}
