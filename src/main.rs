//! # Env Publisher
//!
//! Samples environmental sensors on a Raspberry Pi and publishes readings to
//! the ingestion endpoint, spooling them locally while the network is down.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use env_publisher::config::{Config, LoggingConfig};
use env_publisher::device::resolve_device_id;
use env_publisher::publisher::{Publisher, PublisherSettings};
use env_publisher::queue::OfflineQueue;
use env_publisher::sender::{HttpSender, RetryingSender};
use env_publisher::sensor::{IioSensor, MultiSensor};
use env_publisher::status::{LedIndicator, StatusHooks};

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Log file name prefix inside `logging.log_dir`
const LOG_FILE_PREFIX: &str = "env-publisher.log";

/// Initialize logging: stdout always, plus a daily rolling file when
/// `logging.log_dir` is set. The returned guard must live until exit.
fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(logging.level.to_ascii_lowercase()))
    };

    match &logging.log_dir {
        Some(dir) => {
            use tracing_subscriber::layer::SubscriberExt;
            use tracing_subscriber::util::SubscriberInitExt;

            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter())
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .try_init()
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Ok(None)
        }
    }
}

/// Main entry point for the publisher
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (path from the first argument)
///    - Set up logging
///    - Resolve the device id, open the offline queue, build the sender
///    - Turn the status LED off (normal state)
///
/// 2. **Main Loop**
///    - Optional one-time warm-up, then one tick per sample interval
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Close the offline queue database
///
/// # Errors
///
/// Returns error if:
/// - Configuration cannot be loaded or is invalid
/// - The offline queue database cannot be opened
/// - The sensor source fails outright
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let _log_guard = init_tracing(&config.logging)?;

    info!("Env Publisher v{} starting...", env!("CARGO_PKG_VERSION"));

    let device_id = resolve_device_id(config.publisher.device_id.as_deref());
    info!("Device id: {}", device_id);

    if config.sensors.channels.is_empty() {
        warn!("No sensor channels configured; readings will carry no measurements");
    }
    let sensor = MultiSensor::new().with_source(IioSensor::new(config.sensors.channels.clone()));

    let hooks = if config.led.enabled {
        let led = Arc::new(LedIndicator::new(
            &config.led.sysfs_base,
            config.led.blink_on_ms,
            config.led.blink_off_ms,
        ));
        if let Err(e) = led.off() {
            warn!("Failed to reset status LED: {}", e);
        }
        led.into_hooks()
    } else {
        StatusHooks::new()
    };

    let queue = OfflineQueue::open(&config.spool.db_path, config.spool.max_rows)
        .with_context(|| format!("failed to open offline queue at {}", config.spool.db_path))?;
    if let Some(backlog) = queue.backlog() {
        info!("Offline queue at {} holds {} readings", config.spool.db_path, backlog);
    }

    let http = HttpSender::new(
        &config.endpoint.url,
        &config.endpoint.post_secret,
        &config.endpoint.user_agent,
        config.request_timeout(),
    )?;
    let sender = RetryingSender::new(http, config.retry_policy());
    info!("Publishing to {}", config.endpoint.url);

    let mut publisher = Publisher::new(
        sensor,
        sender,
        queue,
        hooks,
        device_id,
        PublisherSettings::from_config(&config),
    );

    info!("Press Ctrl+C to exit");

    let outcome = tokio::select! {
        result = publisher.run() => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
    };

    publisher.close()?;
    outcome
}
