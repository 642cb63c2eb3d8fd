//! Structured logging for the distributed key-value cache
//!
//! This module provides structured logging using the `tracing` crate with
//! support for console output, file logging, and log rotation.

use crate::config::{CacheConfig, LogFormat, LogRotationInterval, LoggingConfig};
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{time::UtcTime, writer::BoxMakeWriter};
use tracing_subscriber::EnvFilter;

type LogResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

static INIT: Once = Once::new();

/// Initialize the logging system based on configuration.
///
/// Only the first call installs a subscriber. When logging goes to a file the
/// returned guard must be kept alive for buffered lines to be flushed.
pub fn init_logging(config: &LoggingConfig) -> LogResult<Option<WorkerGuard>> {
    let mut result = Ok(None);
    INIT.call_once(|| {
        result = init_logging_inner(config);
    });
    result
}

fn init_logging_inner(config: &LoggingConfig) -> LogResult<Option<WorkerGuard>> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    let (writer, guard) = match &config.file_path {
        Some(file_path) => {
            let (writer, guard) = file_writer(file_path, config.rotation);
            (writer, Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer);

    match config.format {
        LogFormat::Json => builder.json().try_init()?,
        LogFormat::Pretty => builder.pretty().try_init()?,
        LogFormat::Simple => builder.compact().try_init()?,
    }

    tracing::info!("Logging system initialized with level: {:?}", config.level);
    Ok(guard)
}

/// Create a non-blocking, rotating file writer
fn file_writer(file_path: &str, rotation: LogRotationInterval) -> (BoxMakeWriter, WorkerGuard) {
    let path = Path::new(file_path);
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|f| f.to_os_string())
        .unwrap_or_else(|| "meshcache.log".into());

    let appender = match rotation {
        LogRotationInterval::Daily => tracing_appender::rolling::daily(directory, file_name),
        LogRotationInterval::Hourly => tracing_appender::rolling::hourly(directory, file_name),
        LogRotationInterval::Never => tracing_appender::rolling::never(directory, file_name),
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    (BoxMakeWriter::new(non_blocking), guard)
}

/// Log a cache operation with structured fields
pub fn log_cache_operation(operation: &str, key: &str, success: bool, duration: Duration, route: &str) {
    let span = tracing::debug_span!(
        "cache_operation",
        operation = operation,
        key = key,
        route = route,
        success = success,
        duration_ms = duration.as_millis() as u64,
    );
    let _enter = span.enter();

    if success {
        tracing::debug!("Cache operation completed");
    } else {
        tracing::debug!("Cache operation failed");
    }
}

/// Log a cluster operation with structured fields
pub fn log_cluster_operation(
    operation: &str,
    peer: &str,
    success: bool,
    duration: Duration,
    detail: Option<&str>,
) {
    let span = tracing::info_span!(
        "cluster_operation",
        operation = operation,
        peer = peer,
        success = success,
        duration_ms = duration.as_millis() as u64,
    );
    let _enter = span.enter();

    match (success, detail) {
        (true, _) => tracing::debug!("Cluster operation completed successfully"),
        (false, Some(detail)) => tracing::warn!(detail, "Cluster operation failed"),
        (false, None) => tracing::warn!("Cluster operation failed"),
    }
}

/// Log system startup
pub fn log_startup(config: &CacheConfig) {
    tracing::info!("Starting meshcache node");
    tracing::info!("Listen address: {}", config.node.listen_addr);
    if let Some(advertise) = &config.node.advertise_addr {
        tracing::info!("Advertised address: {}", advertise);
    }
    tracing::info!("Ring replicas per node: {}", config.ring.replicas);
    if !config.node.seeds.is_empty() {
        tracing::info!("Seed peers: {}", config.node.seeds.join(", "));
    }
    if config.metrics.enabled {
        tracing::info!("Metrics enabled: {}", config.metrics.bind_address);
    }
}

/// Log system shutdown
pub fn log_shutdown(reason: &str) {
    tracing::info!("Shutting down meshcache node: {}", reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggingConfig;

    #[test]
    fn test_logging_initialization() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        // A second call is a no-op
        assert!(matches!(init_logging(&config), Ok(None)));
    }

    #[test]
    fn test_file_writer_accepts_bare_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.log");
        let (_writer, _guard) = file_writer(path.to_str().unwrap(), LogRotationInterval::Never);
    }
}
