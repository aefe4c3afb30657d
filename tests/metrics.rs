#![cfg(feature = "metrics")]
//! Tests for `wiremux` metrics helpers.
//!
//! These tests verify that counters and gauges update as expected using
//! `metrics_util::debugging::DebuggingRecorder`.

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use rstest::rstest;
use wiremux::{
    Frame,
    OutboundHandle,
    StreamId,
    StreamRegistry,
    metrics::{self as mux_metrics, Direction},
    outbound,
};

/// Creates a debugging recorder and snapshotter for metrics testing.
fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

fn counter_value(snapshotter: &Snapshotter, name: &str, direction: Option<&str>) -> Option<u64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(key, _, _, value)| {
            let labelled = direction.is_none_or(|d| {
                key.key()
                    .labels()
                    .any(|l| l.key() == "direction" && l.value() == d)
            });
            match value {
                DebugValue::Counter(c) if key.key().name() == name && labelled => Some(c),
                _ => None,
            }
        })
}

fn gauge_value(snapshotter: &Snapshotter, name: &str) -> Option<f64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(key, _, _, value)| match value {
            DebugValue::Gauge(g) if key.key().name() == name => Some(g.into_inner()),
            _ => None,
        })
}

#[test]
fn outbound_send_counts_frames() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        let (tx, _rx) = outbound::channel();
        tx.send(Frame::cancel(StreamId::new(1)));
        tx.send(Frame::cancel(StreamId::new(3)));
    });

    assert_eq!(
        counter_value(&snapshotter, mux_metrics::FRAMES_PROCESSED, Some("outbound")),
        Some(2)
    );
}

#[test]
fn inbound_frame_metric_increments() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        mux_metrics::inc_frames(Direction::Inbound);
    });

    assert_eq!(
        counter_value(&snapshotter, mux_metrics::FRAMES_PROCESSED, Some("inbound")),
        Some(1)
    );
}

#[test]
fn registry_tracks_active_streams() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        let registry = StreamRegistry::new();
        for id in [1, 3, 5] {
            registry
                .register_outbound(
                    StreamId::new(id),
                    OutboundHandle::task(tokio_util::sync::CancellationToken::new()),
                )
                .expect("register");
        }
        registry.remove_outbound(StreamId::new(1));
    });
    assert_eq!(gauge_value(&snapshotter, mux_metrics::STREAMS_ACTIVE), Some(2.0));

    metrics::with_local_recorder(&recorder, || {
        let registry = StreamRegistry::new();
        registry
            .register_outbound(
                StreamId::new(1),
                OutboundHandle::task(tokio_util::sync::CancellationToken::new()),
            )
            .expect("register");
        assert_eq!(registry.cancel_all(|_| {}), 1);
    });
    assert_eq!(gauge_value(&snapshotter, mux_metrics::STREAMS_ACTIVE), Some(2.0));
}

#[rstest]
#[case(1)]
#[case(2)]
fn inc_connection_panics_counts(#[case] expected: u64) {
    let (snapshotter, recorder) = debugging_recorder_setup();

    metrics::with_local_recorder(&recorder, || {
        (0..expected).for_each(|_| mux_metrics::inc_connection_panics());
    });

    assert_eq!(
        counter_value(&snapshotter, mux_metrics::CONNECTION_PANICS, None),
        Some(expected)
    );
}

#[test]
fn error_metric_increments() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, mux_metrics::inc_errors);

    assert_eq!(
        counter_value(&snapshotter, mux_metrics::ERRORS_TOTAL, None),
        Some(1)
    );
}
