//! # Error Types
//!
//! Custom error types for the environmental publisher using `thiserror`.

use thiserror::Error;

/// Main error type for the publisher
#[derive(Debug, Error)]
pub enum PublisherError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Offline queue storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Payload (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network transport errors (DNS, connect, timeout)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Endpoint answered with a non-2xx status
    #[error("Endpoint rejected reading with HTTP status {0}")]
    Rejected(u16),

    /// Sensor capability failures
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Status hook failures
    #[error("Status hook error: {0}")]
    Hook(String),
}

/// Result type alias for the publisher
pub type Result<T> = std::result::Result<T, PublisherError>;
