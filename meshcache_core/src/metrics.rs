//! Metrics collection for the distributed key-value cache
//!
//! Counters and gauges are emitted through the `metrics` facade; the server
//! binary decides whether a Prometheus exporter is installed. Without an
//! installed recorder these calls are no-ops.

use std::time::Duration;

use crate::error::CacheError;

/// Record the outcome of a get or set handled by this node.
pub fn record_cache_operation(operation: &'static str, outcome: &Result<(), &CacheError>, duration: Duration) {
    let outcome_label = match outcome {
        Ok(()) => "success",
        Err(CacheError::NotFound(_)) => "miss",
        Err(err) => err.kind(),
    };
    metrics::counter!(
        "meshcache_cache_operations_total",
        1,
        "operation" => operation,
        "outcome" => outcome_label
    );
    metrics::histogram!(
        "meshcache_cache_operation_seconds",
        duration.as_secs_f64(),
        "operation" => operation
    );
}

/// Record a membership change and the resulting registry size.
pub fn record_membership_change(known_peers: usize) {
    metrics::counter!("meshcache_membership_changes_total", 1);
    metrics::gauge!("meshcache_known_peers", known_peers as f64);
}

/// Record one join announcement sent during fan-out.
pub fn record_announcement(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("meshcache_announcements_total", 1, "outcome" => outcome);
}
