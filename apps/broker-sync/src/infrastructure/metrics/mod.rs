//! Prometheus Metrics Module
//!
//! Exposes sync metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames by type and decode failures by kind
//! - **Entities**: Reconciler outcomes by entity type
//! - **Connections**: Live connection gauge, reconnects, auth rejections
//! - **Fan-out**: Snapshot notifications, listener panics, merge latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::reconciler::{EntityType, ReconcileOutcome};
use crate::infrastructure::tradovate::messages::Frame;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Inbound traffic
    describe_counter!(
        "broker_sync_frames_received_total",
        "Total frames received from Tradovate by frame type"
    );
    describe_counter!(
        "broker_sync_decode_errors_total",
        "Total frames or items skipped because they could not be decoded"
    );
    describe_counter!(
        "broker_sync_unrecognized_items_total",
        "Total array items that matched no known shape"
    );
    describe_counter!(
        "broker_sync_heartbeats_sent_total",
        "Total client heartbeats sent"
    );

    // Reconciliation
    describe_counter!(
        "broker_sync_entity_events_total",
        "Total entity events applied by entity type and outcome"
    );

    // Connection lifecycle
    describe_gauge!(
        "broker_sync_live_connections",
        "Number of connections currently in the live state"
    );
    describe_counter!(
        "broker_sync_reconnects_total",
        "Total reconnects scheduled"
    );
    describe_counter!(
        "broker_sync_auth_rejections_total",
        "Total authorize commands rejected by the server"
    );

    // Fan-out
    describe_counter!(
        "broker_sync_snapshot_notifications_total",
        "Total merged snapshots delivered to subscribers"
    );
    describe_counter!(
        "broker_sync_listener_panics_total",
        "Total subscriber callbacks that panicked"
    );
    describe_histogram!(
        "broker_sync_merge_seconds",
        "Time to merge all connection snapshots and notify subscribers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const fn frame_label(frame: &Frame) -> &'static str {
    match frame {
        Frame::Open => "open",
        Frame::Heartbeat => "heartbeat",
        Frame::Close { .. } => "close",
        Frame::Array(_) => "array",
    }
}

const fn outcome_label(outcome: &ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::Changed(_) => "changed",
        ReconcileOutcome::Unchanged(_) => "unchanged",
        ReconcileOutcome::Refresh => "refresh",
        ReconcileOutcome::Rejected { .. } => "rejected",
    }
}

/// Record a frame received from Tradovate.
pub fn record_frame_received(frame: &Frame) {
    counter!(
        "broker_sync_frames_received_total",
        "frame" => frame_label(frame)
    )
    .increment(1);
}

/// Record a frame or item that could not be decoded.
pub fn record_decode_error(kind: &'static str) {
    counter!(
        "broker_sync_decode_errors_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record an array item of unknown shape.
pub fn record_unrecognized_item() {
    counter!("broker_sync_unrecognized_items_total").increment(1);
}

/// Record a client heartbeat.
pub fn record_heartbeat_sent() {
    counter!("broker_sync_heartbeats_sent_total").increment(1);
}

/// Record one applied entity event.
pub fn record_entity_event(entity_type: EntityType, outcome: &ReconcileOutcome) {
    counter!(
        "broker_sync_entity_events_total",
        "entity_type" => entity_type.as_str(),
        "outcome" => outcome_label(outcome)
    )
    .increment(1);
}

/// A connection entered the live state.
pub fn increment_live_connections() {
    gauge!("broker_sync_live_connections").increment(1.0);
}

/// A connection left the live state.
pub fn decrement_live_connections() {
    gauge!("broker_sync_live_connections").decrement(1.0);
}

/// Record a scheduled reconnect.
pub fn record_reconnect() {
    counter!("broker_sync_reconnects_total").increment(1);
}

/// Record a rejected authorize.
pub fn record_auth_rejection() {
    counter!("broker_sync_auth_rejections_total").increment(1);
}

/// Record one merge-and-notify pass.
pub fn record_notification(delivered: usize, panicked: usize, duration: Duration) {
    counter!("broker_sync_snapshot_notifications_total").increment(delivered as u64);
    if panicked > 0 {
        counter!("broker_sync_listener_panics_total").increment(panicked as u64);
    }
    histogram!("broker_sync_merge_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_labels() {
        assert_eq!(frame_label(&Frame::Open), "open");
        assert_eq!(frame_label(&Frame::Heartbeat), "heartbeat");
        assert_eq!(
            frame_label(&Frame::Close {
                code: Some(1000),
                reason: String::new()
            }),
            "close"
        );
        assert_eq!(frame_label(&Frame::Array(Vec::new())), "array");
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(
            outcome_label(&ReconcileOutcome::Changed(EntityType::Order)),
            "changed"
        );
        assert_eq!(outcome_label(&ReconcileOutcome::Refresh), "refresh");
        assert_eq!(
            outcome_label(&ReconcileOutcome::Rejected {
                entity_type: EntityType::Order,
                reason: "no id".to_string()
            }),
            "rejected"
        );
    }

    #[test]
    fn recording_without_recorder_is_harmless() {
        record_frame_received(&Frame::Heartbeat);
        record_decode_error("json");
        record_notification(3, 1, Duration::from_micros(50));
    }
}
