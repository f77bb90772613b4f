//! # Env Publisher Library
//!
//! Samples environmental sensors on an edge device and delivers readings to
//! a remote collector over an unreliable network.
//!
//! Readings that cannot be delivered immediately are kept in a bounded,
//! deduplicating SQLite queue and replayed oldest-first on later ticks.

pub mod config;
pub mod device;
pub mod error;
pub mod publisher;
pub mod queue;
pub mod reading;
pub mod sender;
pub mod sensor;
pub mod status;
