//! Prometheus metrics for the fanout core.
//!
//! All metrics follow Prometheus naming conventions:
//! - `fanout_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: 3 values (hub, room, connection)
//! - `reason`: bounded drop reasons (~4 values)
//! - `channel_kind`: 2 values (global, room); room names are never labels
//! - `operation`: bounded store operations (~5 values)

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Registry Gauges
// ============================================================================

/// Set the number of sessions registered with this instance's hub.
///
/// Metric: `fanout_connections_active`
/// Labels: none
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("fanout_connections_active").set(count as f64);
}

/// Set the number of rooms running on this instance.
///
/// Metric: `fanout_rooms_active`
/// Labels: none
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("fanout_rooms_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `fanout_actor_mailbox_depth`
/// Labels: `actor_type` (hub, room, connection)
///
/// Cardinality: 3 (bounded by ActorType enum)
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("fanout_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Record an inbound envelope that was dropped.
///
/// Metric: `fanout_envelopes_dropped_total`
/// Labels: `reason` (malformed, server_only, unknown_room)
pub fn record_envelope_dropped(reason: &'static str) {
    counter!("fanout_envelopes_dropped_total", "reason" => reason).increment(1);
}

/// Record a slow consumer disconnected because its outbound mailbox was full.
///
/// Metric: `fanout_mailbox_overflow_total`
/// Labels: none
pub fn record_mailbox_overflow() {
    counter!("fanout_mailbox_overflow_total").increment(1);
}

/// Record a failed bus publish.
///
/// Metric: `fanout_bus_publish_failures_total`
/// Labels: `channel_kind` (global, room)
pub fn record_bus_publish_failure(channel_kind: &'static str) {
    counter!("fanout_bus_publish_failures_total", "channel_kind" => channel_kind).increment(1);
}

/// Record a failed store operation.
///
/// Metric: `fanout_store_failures_total`
/// Labels: `operation` (identity_create, identity_delete, identity_get, identity_list, room_create, room_get)
pub fn record_store_failure(operation: &'static str) {
    counter!("fanout_store_failures_total", "operation" => operation).increment(1);
}

/// Record one bus payload fanned out by a room to its local members.
///
/// Metrics: `fanout_room_fanout_total` (payloads), `fanout_room_deliveries_total`
/// (mailbox writes)
/// Labels: none
pub fn record_room_fanout(recipients: usize) {
    counter!("fanout_room_fanout_total").increment(1);
    counter!("fanout_room_deliveries_total").increment(recipients as u64);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_counters_increment() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_mailbox_overflow();
            record_mailbox_overflow();
            record_envelope_dropped("malformed");
        });

        let counters: std::collections::HashMap<String, u64> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(v) => Some((key.key().name().to_string(), v)),
                _ => None,
            })
            .collect();

        assert_eq!(counters.get("fanout_mailbox_overflow_total"), Some(&2));
        assert_eq!(counters.get("fanout_envelopes_dropped_total"), Some(&1));
    }

    #[test]
    fn test_gauges_without_recorder_are_noops() {
        set_connections_active(5);
        set_rooms_active(2);
        set_actor_mailbox_depth("hub", 0);
        record_room_fanout(3);
    }
}
