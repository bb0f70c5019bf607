//! Metrics definitions for the mesh coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `mesh_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded enums, never participant or session ids:
//! - `kind`: 3 values (offer, answer, ice_candidate)
//! - `outcome`: applied, sent, deferred, queued, dropped plus the rejection
//!   reasons of [`RejectReason`](crate::signaling::RejectReason) (~12 values)
//! - `reason`: connection, timeout, create, panic

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Signal Metrics (Counters)
// ============================================================================

/// Record a signal passing through a peer link.
///
/// Metric: `mesh_signals_total`
/// Labels: `kind`, `outcome`
///
/// Cardinality: ~36 (3 kinds x ~12 outcomes)
pub fn record_signal(kind: &str, outcome: &str) {
    counter!("mesh_signals_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a replayed signal rejected by the deduplicator.
///
/// Metric: `mesh_signals_duplicate_total`
/// Labels: `kind`
///
/// Non-zero values are expected: the relay delivers at least once.
pub fn record_duplicate(kind: &str) {
    counter!("mesh_signals_duplicate_total", "kind" => kind.to_string()).increment(1);
}

/// Record a buffered signal evicted because its pending queue was full.
///
/// Metric: `mesh_pending_signals_dropped_total`
/// Labels: none
pub fn record_pending_dropped() {
    counter!("mesh_pending_signals_dropped_total").increment(1);
}

/// Record a failed hand-off to the signal relay.
///
/// Metric: `mesh_relay_send_failures_total`
/// Labels: none
///
/// Failures are not retried; the affected negotiation stalls and is later
/// reported through `mesh_peer_failures_total{reason="timeout"}`.
pub fn record_relay_send_failure() {
    counter!("mesh_relay_send_failures_total").increment(1);
}

// ============================================================================
// Peer Metrics
// ============================================================================

/// Set the number of live peer links.
///
/// Metric: `mesh_peers_active`
/// Labels: none
pub fn set_peers_active(count: usize) {
    // usize to f64 conversion is safe for realistic peer counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("mesh_peers_active").set(count as f64);
}

/// Record a peer link torn down because of a failure.
///
/// Metric: `mesh_peer_failures_total`
/// Labels: `reason` (connection, timeout, create, panic)
///
/// ALERT: `panic` indicates a bug.
pub fn record_peer_failure(reason: &str) {
    counter!("mesh_peer_failures_total", "reason" => reason.to_string()).increment(1);
}

/// Record the time a link spent out of `Stable` for one negotiation.
///
/// Metric: `mesh_negotiation_duration_seconds`
/// Labels: none
pub fn record_negotiation_duration(duration: Duration) {
    histogram!("mesh_negotiation_duration_seconds").record(duration.as_secs_f64());
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
            record_signal("offer", "applied");
            record_signal("answer", "stale_answer");
            record_duplicate("answer");
            record_pending_dropped();
            record_relay_send_failure();
            set_peers_active(3);
            record_peer_failure("timeout");
            record_negotiation_duration(Duration::from_millis(120));
        });

        let metrics = snapshotter.snapshot().into_vec();
        let names: Vec<String> = metrics
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "mesh_signals_total",
            "mesh_signals_duplicate_total",
            "mesh_pending_signals_dropped_total",
            "mesh_relay_send_failures_total",
            "mesh_peers_active",
            "mesh_peer_failures_total",
            "mesh_negotiation_duration_seconds",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}, got {names:?}"
            );
        }

        // Two distinct label sets for the signal counter
        let signal_series = names.iter().filter(|n| *n == "mesh_signals_total").count();
        assert_eq!(signal_series, 2);

        let gauge = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "mesh_peers_active")
            .map(|(_, _, _, value)| value)
            .unwrap();
        assert!(
            matches!(gauge, DebugValue::Gauge(v) if (v.into_inner() - 3.0).abs() < f64::EPSILON)
        );
    }

    #[test]
    fn test_metric_names_follow_conventions() {
        let counters = [
            "mesh_signals_total",
            "mesh_signals_duplicate_total",
            "mesh_pending_signals_dropped_total",
            "mesh_relay_send_failures_total",
            "mesh_peer_failures_total",
        ];
        for name in counters {
            assert!(name.starts_with("mesh_"));
            assert!(name.ends_with("_total"));
        }
        assert!("mesh_negotiation_duration_seconds".ends_with("_seconds"));
    }
}
