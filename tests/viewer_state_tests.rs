//! Tests for the viewer state reducer and control dispatcher: re-sync on
//! reconnect, history ordering, control enablement and frame replacement.

use std::sync::Arc;

use camera_relay::analysis::Analyzer;
use camera_relay::camera::{Camera, FrameReader};
use camera_relay::protocol::{AnalysisRecord, ClientCommand, ServerEvent};
use camera_relay::registry::{RegistrySettings, SessionRegistry};
use camera_relay::state::{ConnectionState, ControlEnablement, InboundEvent, ViewerState};
use camera_relay::{dispatch, RelayError, UserIntent, DEFAULT_PROMPT};
use proptest::prelude::*;
use rstest::rstest;

fn record(id: u64, prompt: &str, response: &str) -> AnalysisRecord {
    AnalysisRecord {
        id,
        timestamp: format!("2026-10-19 12:00:{:02}", id % 60),
        prompt: prompt.to_string(),
        response: response.to_string(),
    }
}

fn apply(state: ViewerState, ev: ServerEvent) -> ViewerState {
    state.reduce(&InboundEvent::Server(ev)).state
}

fn connected() -> ViewerState {
    ViewerState::new().reduce(&InboundEvent::Connected).state
}

// ---------------------------------------------------------------------------
// Re-sync on reconnect
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_snapshot_replay_matches_live_order(count in 0u64..40) {
        let mut live = connected();
        let mut server_history = Vec::new();
        for id in 1..=count {
            let r = record(id, "p", "r");
            server_history.insert(0, r.clone());
            live = apply(live, ServerEvent::NewResponse(r));
        }

        let resynced = live
            .clone()
            .reduce(&InboundEvent::Disconnected)
            .state
            .reduce(&InboundEvent::Connected)
            .state;
        let resynced = apply(resynced, ServerEvent::ResponsesHistory { history: server_history });

        prop_assert_eq!(live.history.ids(), resynced.history.ids());
    }

    #[test]
    fn prop_history_cleared_always_empties(count in 0u64..20) {
        let mut s = connected();
        for id in 1..=count {
            s = apply(s, ServerEvent::NewResponse(record(id, "p", "r")));
        }
        let s = apply(s, ServerEvent::HistoryCleared);
        prop_assert!(s.history.is_empty());
        prop_assert!(s.response_panel.is_empty());
    }
}

struct StaticCamera;

struct StaticReader;

impl FrameReader for StaticReader {
    fn read_frame(&mut self) -> Result<Vec<u8>, RelayError> {
        Ok(b"jpeg".to_vec())
    }
}

impl Camera for StaticCamera {
    fn open(&self) -> Result<Box<dyn FrameReader>, RelayError> {
        Ok(Box::new(StaticReader))
    }
    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// History ids seen live, and after a reconnect replaying the registry's own
/// connect snapshot.
async fn live_and_resynced(limit: Option<usize>, analyses: usize) -> (Vec<u64>, Vec<u64>) {
    let registry = SessionRegistry::new(
        Arc::new(StaticCamera),
        Analyzer::Canned("r".to_string()),
        RegistrySettings {
            history_limit: limit,
            ..RegistrySettings::default()
        },
    );
    let mut rx = registry.subscribe();
    let mut live = connected();
    for _ in 0..analyses {
        registry.analyze_now("p").await.unwrap();
    }
    while let Ok(ev) = rx.try_recv() {
        live = apply(live, ev);
    }

    let mut resynced = live
        .clone()
        .reduce(&InboundEvent::Disconnected)
        .state
        .reduce(&InboundEvent::Connected)
        .state;
    for ev in registry.connect_snapshot() {
        resynced = apply(resynced, ev);
    }
    (live.history.ids(), resynced.history.ids())
}

#[rstest]
#[case(None, 5, vec![5, 4, 3, 2, 1])]
#[case(Some(3), 2, vec![2, 1])]
#[case(Some(3), 5, vec![5, 4, 3])]
#[tokio::test]
async fn test_registry_snapshot_matches_live_view(
    #[case] limit: Option<usize>,
    #[case] analyses: usize,
    #[case] expected: Vec<u64>,
) {
    let (live, resynced) = live_and_resynced(limit, analyses).await;
    assert_eq!(live, expected);
    assert_eq!(resynced, expected);
}

#[test]
fn test_snapshot_applied_twice_does_not_duplicate() {
    let snapshot = vec![record(2, "p", "b"), record(1, "p", "a")];
    let s = apply(connected(), ServerEvent::ResponsesHistory { history: snapshot.clone() });
    let s = apply(s, ServerEvent::ResponsesHistory { history: snapshot });
    assert_eq!(s.history.ids(), vec![2, 1]);
}

#[test]
fn test_duplicate_new_response_shown_once() {
    let s = apply(connected(), ServerEvent::NewResponse(record(1, "p", "a")));
    let s = apply(s, ServerEvent::NewResponse(record(1, "p", "a")));
    assert_eq!(s.history.len(), 1);
}

#[test]
fn test_reconnect_sends_start_stream_again() {
    let s = connected().reduce(&InboundEvent::Disconnected).state;
    let t = s.reduce(&InboundEvent::Connected);
    assert_eq!(t.state.connection, ConnectionState::Connected);
    assert_eq!(t.outbound, Some(ClientCommand::StartStream));
}

// ---------------------------------------------------------------------------
// Control enablement
// ---------------------------------------------------------------------------

#[test]
fn test_auto_capture_state_not_running_keeps_defaults() {
    let before = connected();
    let after = apply(
        before.clone(),
        ServerEvent::AutoCaptureState {
            is_running: false,
            interval: 5,
        },
    );
    assert_eq!(after.controls, ControlEnablement::IDLE);
    assert_eq!(after, before);
}

#[test]
fn test_auto_capture_state_running_matches_started() {
    let via_state = apply(
        connected(),
        ServerEvent::AutoCaptureState {
            is_running: true,
            interval: 9,
        },
    );
    let via_started = apply(connected(), ServerEvent::AutoCaptureStarted { interval: 9 });
    assert_eq!(via_state, via_started);
}

#[test]
fn test_started_then_stopped_restores_enablement() {
    let before = connected();
    let s = apply(before.clone(), ServerEvent::AutoCaptureStarted { interval: 5 });
    let s = apply(s, ServerEvent::AutoCaptureStopped);
    assert_eq!(s.controls, before.controls);
    assert!(!s.auto_capture.is_running);
    assert_eq!(s.auto_capture.interval_seconds, None);
}

#[test]
fn test_start_auto_capture_scenario() {
    let s = connected();
    let cmd = dispatch(
        UserIntent::StartAutoCapture {
            interval: "5".into(),
            prompt: "describe".into(),
        },
        &s,
    )
    .unwrap();
    assert_eq!(
        cmd,
        ClientCommand::StartAutoCapture {
            interval: 5,
            prompt: "describe".into()
        }
    );
    // Nothing changes until the server confirms.
    assert_eq!(s.controls, ControlEnablement::IDLE);

    let s = apply(s, ServerEvent::AutoCaptureStarted { interval: 5 });
    assert!(s.controls.stop_auto);
    assert!(!s.controls.start_auto);
    assert!(!s.controls.interval_input);
    assert_eq!(s.auto_capture.interval_seconds, Some(5));
}

// ---------------------------------------------------------------------------
// Capture scenario
// ---------------------------------------------------------------------------

#[test]
fn test_capture_after_snapshot_scenario() {
    let s = connected();
    let s = apply(
        s,
        ServerEvent::ResponsesHistory {
            history: vec![record(2, "p", "b"), record(1, "p", "a")],
        },
    );

    let cmd = dispatch(UserIntent::CaptureAndAnalyze { prompt: "".into() }, &s).unwrap();
    assert_eq!(
        cmd,
        ClientCommand::CaptureAndAnalyze {
            prompt: DEFAULT_PROMPT.into()
        }
    );

    let s = apply(s, ServerEvent::NewResponse(record(3, DEFAULT_PROMPT, "a cat")));
    assert_eq!(s.history.ids(), vec![3, 2, 1]);
    assert_eq!(s.response_panel, "a cat");
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

#[test]
fn test_last_applied_frame_wins() {
    // Frames arrive in the order c, a, b regardless of capture order.
    let mut s = connected();
    for image in ["Yw==", "YQ==", "Yg=="] {
        s = apply(s, ServerEvent::VideoFrame { image: image.into() });
    }
    let frame = s.frame.unwrap();
    assert_eq!(frame.image, "Yg==");
    assert_eq!(frame.sequence, 3);
}

// ---------------------------------------------------------------------------
// Disconnected behaviour
// ---------------------------------------------------------------------------

#[test]
fn test_intents_dropped_while_disconnected() {
    let s = apply(connected(), ServerEvent::AutoCaptureStarted { interval: 5 });
    let s = s.reduce(&InboundEvent::Disconnected).state;
    assert!(dispatch(UserIntent::StopAutoCapture, &s).is_err());
    // enablement is frozen, not reset
    assert_eq!(s.controls, ControlEnablement::CAPTURING);
}

#[test]
fn test_analysis_error_leaves_stream_and_auto_capture() {
    let s = apply(connected(), ServerEvent::stream_status(true));
    let s = apply(s, ServerEvent::AutoCaptureStarted { interval: 2 });
    let s = apply(s, ServerEvent::AnalysisError { error: "timeout".into() });
    assert_eq!(s.response_panel, "Error: timeout");
    assert!(s.auto_capture.is_running);
    assert_eq!(s.stream, camera_relay::state::StreamState::Running);
}
