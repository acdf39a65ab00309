//! Prometheus metric definitions for the signaling hub.
//!
//! Naming follows Prometheus conventions: `hub_` prefix, `_total` suffix for
//! counters, `_seconds` suffix for duration histograms.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder and return the render handle.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Relay handling is in-memory; most frames should finish well under 10ms
        .set_buckets_for_metric(
            Matcher::Prefix("hub_message".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `hub_sessions_active`
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_sessions_active").set(count as f64);
}

/// Metric: `hub_participants_active`
pub fn set_participants_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_participants_active").set(count as f64);
}

/// Metric: `hub_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_connections_active").set(count as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Record a frame delivered to another participant.
///
/// Metric: `hub_messages_relayed_total`
/// Labels: `kind` (signal, chat, participant-joined, participant-left)
pub fn record_message_relayed(kind: &'static str) {
    counter!("hub_messages_relayed_total", "kind" => kind).increment(1);
}

/// Record a frame that was not delivered.
///
/// Metric: `hub_messages_dropped_total`
/// Labels: `reason`
pub fn record_message_dropped(reason: &'static str) {
    counter!("hub_messages_dropped_total", "reason" => reason).increment(1);
}

/// Record a join attempt outcome.
///
/// Metric: `hub_joins_total`
/// Labels: `result` (ok, rejoin, capacity, invalid, conflict)
pub fn record_join(result: &'static str) {
    counter!("hub_joins_total", "result" => result).increment(1);
}

/// Metric: `hub_actor_panics_total`
///
/// ALERT: any non-zero value indicates a bug.
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("hub_actor_panics_total", "actor_type" => actor_type).increment(1);
}

// ============================================================================
// Histograms
// ============================================================================

/// Record time spent handling one inbound frame.
///
/// Metric: `hub_message_latency_seconds`
/// Labels: `kind`
pub fn record_message_latency(kind: &'static str, duration: Duration) {
    histogram!("hub_message_latency_seconds", "kind" => kind).record(duration.as_secs_f64());
}
