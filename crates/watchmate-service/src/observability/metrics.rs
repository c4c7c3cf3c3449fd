//! Prometheus metrics for the watch-party service.
//!
//! Naming follows Prometheus conventions:
//! - `wm_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! Labels are bounded:
//! - `status`: `success` or a [`crate::errors::PartyError::metric_label`] value
//! - `event_type`: wire event types (~10 values)
//! - `trigger`: `host`, `all_ready`
//! - `reason`: error labels (7 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder and return its handle for `/metrics`.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("wm_room_create_duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set room create buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `wm_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("wm_rooms_active").set(count as f64);
}

/// Metric: `wm_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("wm_connections_active").set(count as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Metric: `wm_rooms_created_total`
pub fn record_room_created() {
    counter!("wm_rooms_created_total").increment(1);
}

/// Metric: `wm_joins_total`
/// Labels: `status`
pub fn record_join(status: &'static str) {
    counter!("wm_joins_total", "status" => status).increment(1);
}

/// Metric: `wm_events_relayed_total`
/// Labels: `event_type`
pub fn record_event_relayed(event_type: &'static str) {
    counter!("wm_events_relayed_total", "event_type" => event_type).increment(1);
}

/// Metric: `wm_countdowns_total`
/// Labels: `trigger` (`host`, `all_ready`)
pub fn record_countdown_started(trigger: &'static str) {
    counter!("wm_countdowns_total", "trigger" => trigger).increment(1);
}

/// Metric: `wm_events_rejected_total`
/// Labels: `reason`
pub fn record_event_rejected(reason: &'static str) {
    counter!("wm_events_rejected_total", "reason" => reason).increment(1);
}

// ============================================================================
// Histograms
// ============================================================================

/// Metric: `wm_room_create_duration_seconds`
pub fn record_room_create_duration(duration: Duration) {
    histogram!("wm_room_create_duration_seconds").record(duration.as_secs_f64());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_metrics_are_recorded_with_expected_names() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_rooms_active(3);
            set_connections_active(7);
            record_room_created();
            record_join("success");
            record_join("not_found");
            record_event_relayed("chat-message");
            record_countdown_started("all_ready");
            record_event_rejected("unauthorized");
            record_room_create_duration(Duration::from_millis(4));
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let names: Vec<String> = snapshot
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "wm_rooms_active",
            "wm_connections_active",
            "wm_rooms_created_total",
            "wm_joins_total",
            "wm_events_relayed_total",
            "wm_countdowns_total",
            "wm_events_rejected_total",
            "wm_room_create_duration_seconds",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}"
            );
        }

        let rooms_active = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "wm_rooms_active")
            .map(|(_, _, _, value)| value)
            .unwrap();
        assert!(matches!(rooms_active, DebugValue::Gauge(v) if v.into_inner() == 3.0));
    }
}
