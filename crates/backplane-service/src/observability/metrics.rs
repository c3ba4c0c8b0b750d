//! Backplane metrics.
//!
//! All metrics follow Prometheus naming conventions:
//! - `backplane_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `kind`: 4 values (all, group, user, connection)
//! - `actor_type`: 2 values (coordinator, presence)
//! - `reason`: bounded by code (delivery_failed, ping_failed, unresolved, server_expired)
//! - `operation`: bounded by code (send_all, send_group, ...)
//! - `status`: 2 values (success, error)
//! - `hub`: bounded by configuration
//!
//! Entity ids, server ids and connection ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Fan-out spans one round of concurrent observer calls
        .set_buckets_for_metric(
            Matcher::Prefix("backplane_notify".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set notify buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("backplane_send".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set send buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("backplane_state".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set state store buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Coordinator lifecycle
// ============================================================================

/// Record a coordinator activation.
///
/// Metric: `backplane_coordinator_activations_total`
/// Labels: `kind`
pub fn record_coordinator_activation(kind: &str) {
    counter!("backplane_coordinator_activations_total", "kind" => kind.to_string()).increment(1);
}

/// Record a coordinator deactivation (empty subscriber set or shutdown).
///
/// Metric: `backplane_coordinator_deactivations_total`
/// Labels: `kind`
pub fn record_coordinator_deactivation(kind: &str) {
    counter!("backplane_coordinator_deactivations_total", "kind" => kind.to_string())
        .increment(1);
}

/// Set the number of active coordinators on this node.
///
/// Metric: `backplane_coordinators_active`
pub fn set_coordinators_active(count: usize) {
    // usize to f64 conversion is safe for realistic actor counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("backplane_coordinators_active").set(count as f64);
}

/// Record subscribers removed by a coordinator.
///
/// Metric: `backplane_subscribers_evicted_total`
/// Labels: `kind`, `reason`
pub fn record_subscribers_evicted(kind: &str, reason: &str, count: usize) {
    counter!(
        "backplane_subscribers_evicted_total",
        "kind" => kind.to_string(),
        "reason" => reason.to_string()
    )
    .increment(count as u64);
}

// ============================================================================
// Fan-out
// ============================================================================

/// Record one coordinator fan-out round.
///
/// Metric: `backplane_notify_duration_seconds`, `backplane_notify_deliveries_total`
/// Labels: `kind`
pub fn record_notify(kind: &str, deliveries: usize, duration: Duration) {
    histogram!("backplane_notify_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
    counter!("backplane_notify_deliveries_total", "kind" => kind.to_string())
        .increment(deliveries as u64);
}

/// Record a frontend send operation.
///
/// Metric: `backplane_send_duration_seconds`, `backplane_sends_total`
/// Labels: `operation`, `status`
pub fn record_send(operation: &str, status: &str, duration: Duration) {
    histogram!("backplane_send_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
    counter!(
        "backplane_sends_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a failed write to a local client connection.
///
/// Metric: `backplane_connection_write_failures_total`
pub fn record_connection_write_failure() {
    counter!("backplane_connection_write_failures_total").increment(1);
}

/// Set the number of client connections held by this node for a hub.
///
/// Metric: `backplane_connections_active`
/// Labels: `hub`
pub fn set_connections_active(hub: &str, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("backplane_connections_active", "hub" => hub.to_string()).set(count as f64);
}

// ============================================================================
// Presence
// ============================================================================

/// Record a presence heartbeat.
///
/// Metric: `backplane_presence_heartbeats_total`
/// Labels: `status`
pub fn record_presence_heartbeat(status: &str) {
    counter!("backplane_presence_heartbeats_total", "status" => status.to_string()).increment(1);
}

/// Record servers evicted by presence expiry.
///
/// Metric: `backplane_presence_evictions_total`
pub fn record_presence_evictions(count: usize) {
    counter!("backplane_presence_evictions_total").increment(count as u64);
}

// ============================================================================
// Actors and state
// ============================================================================

/// Set the mailbox depth for an actor type.
///
/// Metric: `backplane_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("backplane_actor_mailbox_depth", "actor_type" => actor_type.to_string())
        .set(depth as f64);
}

/// Record a state store operation.
///
/// Metric: `backplane_state_duration_seconds`, `backplane_state_operations_total`
/// Labels: `operation` (load, save, clear), `status`
pub fn record_state_operation(operation: &str, status: &str, duration: Duration) {
    histogram!("backplane_state_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
    counter!(
        "backplane_state_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
