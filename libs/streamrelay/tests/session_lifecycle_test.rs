// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Session Lifecycle Integration Tests
//!
//! Start, link, publish, fault, recover and stop sessions against a
//! recording media backend.

mod common;

use std::time::{Duration, Instant};

use common::{default_harness, drain_notices, planar_frame, video_pad, Harness};
use streamrelay::{
    BusEvent, BusMessage, GraphConfig, LoopEvent, PadInfo, PipelineState, RelayConfig,
    SessionConfig, SessionNotice, StartError, StreamError,
};

fn bus(h: &Harness, session_id: &streamrelay::SessionId, event: BusEvent) {
    h.backend.emit(LoopEvent::Bus(BusMessage {
        session_id: session_id.clone(),
        event,
    }));
}

// =============================================================================
// Start and link
// =============================================================================

#[test]
fn test_started_session_waits_for_source_pad() {
    let mut h = default_harness();
    let config = h.inference_session();
    let id = h
        .coordinator
        .start_session("rtsp://camera.local/stream", "/output", config)
        .unwrap();

    assert_eq!(h.coordinator.session_state(&id), Some(PipelineState::Linking));
    assert!(h.coordinator.mounts().contains("/output"));
    {
        let state = h.backend.state();
        assert!(state.started.contains(&id));
        assert!(state.published.contains_key("/output"));
        assert!(state.dynamic_links.is_empty());
    }
    assert!(matches!(
        drain_notices(&h.coordinator).as_slice(),
        [SessionNotice::Started { publish_path, .. }] if publish_path == "/output"
    ));
}

#[test]
fn test_duplicate_pad_added_links_once() {
    let mut h = default_harness();
    let id = h.playing_session("/output");
    assert_eq!(h.coordinator.session_state(&id), Some(PipelineState::Playing));

    for _ in 0..3 {
        h.backend.emit(LoopEvent::PadAdded {
            session_id: id.clone(),
            pad: video_pad(),
        });
    }
    h.coordinator.process_pending();

    assert_eq!(h.coordinator.session_state(&id), Some(PipelineState::Playing));
    assert_eq!(h.backend.state().dynamic_links.len(), 1);
}

#[test]
fn test_audio_pad_is_ignored() {
    let mut h = default_harness();
    let config = h.inference_session();
    let id = h
        .coordinator
        .start_session("rtsp://camera.local/stream", "/output", config)
        .unwrap();
    h.backend.emit(LoopEvent::PadAdded {
        session_id: id.clone(),
        pad: PadInfo::new("recv_rtp_src_1", "application/x-rtp, media=(string)audio"),
    });
    h.coordinator.process_pending();

    assert_eq!(h.coordinator.session_state(&id), Some(PipelineState::Linking));
    assert!(h.backend.state().dynamic_links.is_empty());
}

#[test]
fn test_dynamic_link_failure_tears_session_down() {
    let mut h = default_harness();
    h.backend.state().fail_dynamic_link = true;
    let config = h.inference_session();
    let id = h
        .coordinator
        .start_session("rtsp://camera.local/stream", "/output", config)
        .unwrap();
    h.backend.emit(LoopEvent::PadAdded {
        session_id: id.clone(),
        pad: video_pad(),
    });
    h.coordinator.process_pending();

    assert_eq!(h.coordinator.session_count(), 0);
    assert!(h.coordinator.mounts().is_empty());
    assert!(drain_notices(&h.coordinator)
        .iter()
        .any(|n| matches!(n, SessionNotice::TornDown { .. })));
}

#[test]
fn test_relay_graph_without_infer_stage() {
    let mut h = default_harness();
    let id = h
        .coordinator
        .start_session(
            "rtsp://camera.local/stream",
            "/relay",
            SessionConfig::new(GraphConfig::rtsp_relay()),
        )
        .unwrap();

    let session = h.coordinator.session(&id).unwrap();
    assert!(session.engine().is_none());
    assert_eq!(h.runtime.loads(), 0);
}

// =============================================================================
// Publish paths
// =============================================================================

#[test]
fn test_invalid_and_duplicate_publish_paths() {
    let mut h = default_harness();
    let config = h.inference_session();
    let err = h
        .coordinator
        .start_session("rtsp://camera.local/stream", "output", config)
        .unwrap_err();
    assert!(matches!(err, StartError::InvalidPublishPath(_)));

    h.playing_session("/output");
    let config = h.inference_session();
    let err = h
        .coordinator
        .start_session("rtsp://camera.local/other", "/output", config)
        .unwrap_err();
    assert!(matches!(err, StartError::DuplicatePublishPath(ref p) if p == "/output"));
    assert_eq!(h.coordinator.session_count(), 1);
}

#[test]
fn test_failed_start_rolls_back() {
    let mut h = default_harness();
    h.backend.state().fail_publish = true;
    let config = h.inference_session();
    let err = h
        .coordinator
        .start_session("rtsp://camera.local/stream", "/output", config)
        .unwrap_err();

    assert!(matches!(err, StartError::Backend(_)));
    assert_eq!(h.coordinator.session_count(), 0);
    assert!(h.coordinator.mounts().is_empty());
    assert_eq!(h.coordinator.monitor().watched_count(), 0);
    assert_eq!(h.backend.state().torn_down.len(), 1);
}

#[test]
fn test_missing_engine_fails_start() {
    let mut h = default_harness();
    let config = SessionConfig::new(GraphConfig::infer_video()).with_engine("/nonexistent/yolo.engine");
    let err = h
        .coordinator
        .start_session("rtsp://camera.local/stream", "/output", config)
        .unwrap_err();

    assert!(matches!(err, StartError::Load(_)));
    assert_eq!(h.coordinator.session_count(), 0);
    assert!(h.backend.state().published.is_empty());
}

#[test]
fn test_sessions_stop_independently() {
    let mut h = default_harness();
    let first = h.playing_session("/output1");
    let second = h.playing_session("/output2");

    h.coordinator.stop_session(&first).unwrap();

    assert_eq!(h.coordinator.session_state(&first), None);
    assert_eq!(
        h.coordinator.session_state(&second),
        Some(PipelineState::Playing)
    );
    assert_eq!(h.coordinator.mounts().paths(), vec!["/output2".to_string()]);
    let state = h.backend.state();
    assert!(state.torn_down.contains(&first));
    assert!(!state.torn_down.contains(&second));
    assert!(!state.published.contains_key("/output1"));
    assert!(state.published.contains_key("/output2"));
}

#[test]
fn test_add_mount_and_stop_removes_every_path() {
    let mut h = default_harness();
    let id = h.playing_session("/output");
    h.coordinator.add_mount(&id, "/mirror").unwrap();
    assert_eq!(h.coordinator.mounts().for_session(&id).len(), 2);

    let err = h.coordinator.add_mount(&id, "/output").unwrap_err();
    assert!(matches!(
        err,
        StreamError::Start(StartError::DuplicatePublishPath(_))
    ));

    h.coordinator.stop_session(&id).unwrap();
    assert!(h.coordinator.mounts().is_empty());
    assert!(h.backend.state().published.is_empty());
}

#[test]
fn test_stop_unknown_session() {
    let mut h = default_harness();
    let id = h.playing_session("/output");
    h.coordinator.stop_session(&id).unwrap();

    let err = h.coordinator.stop_session(&id).unwrap_err();
    assert!(matches!(err, StreamError::SessionNotFound(_)));
}

#[test]
fn test_stop_retires_engine() {
    let mut h = default_harness();
    let id = h.playing_session("/output");
    let engine = h.coordinator.session(&id).unwrap().engine().cloned().unwrap();

    h.coordinator.stop_session(&id).unwrap();
    assert!(!engine.is_healthy());
    assert!(drain_notices(&h.coordinator)
        .iter()
        .any(|n| matches!(n, SessionNotice::Stopped { session_id } if *session_id == id)));
}

#[test]
fn test_stop_waits_for_running_inference() {
    let mut h = default_harness();
    h.runtime.script.lock().delay = Some(Duration::from_millis(200));
    let id = h.playing_session("/output");
    let engine = h.coordinator.session(&id).unwrap().engine().cloned().unwrap();
    let rx = h.coordinator.subscribe(&id).unwrap();

    h.send_frame(&id, planar_frame(1.0));
    h.coordinator.process_pending();
    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.in_flight() == 0 && Instant::now() < deadline {
        std::thread::yield_now();
    }
    assert_eq!(engine.in_flight(), 1);

    h.coordinator.stop_session(&id).unwrap();

    // The running call finished before teardown; nothing else started.
    assert_eq!(engine.in_flight(), 0);
    assert_eq!(h.runtime.script.lock().executions, 1);
    assert!(!engine.is_healthy());
    assert!(h.backend.state().torn_down.contains(&id));

    // The late completion is discarded for the released session.
    h.coordinator.process_next(Duration::from_millis(100));
    assert_eq!(h.coordinator.session_count(), 0);
    assert!(rx.try_recv().is_err());
    assert!(!h.log.contains("still running"));
}

// =============================================================================
// Bus events and recovery
// =============================================================================

#[test]
fn test_end_of_stream_releases_session() {
    let mut h = default_harness();
    let id = h.playing_session("/output");
    bus(&h, &id, BusEvent::EndOfStream);
    h.coordinator.process_pending();

    assert_eq!(h.coordinator.session_count(), 0);
    assert!(h.coordinator.mounts().is_empty());
    assert!(drain_notices(&h.coordinator)
        .iter()
        .any(|n| matches!(n, SessionNotice::Ended { .. })));
}

#[test]
fn test_fault_then_resync_recovers() {
    let mut h = default_harness();
    let id = h.playing_session("/output");
    drain_notices(&h.coordinator);

    bus(&h, &id, BusEvent::error("source", "Could not read from resource"));
    h.coordinator.process_pending();
    assert_eq!(h.coordinator.session_state(&id), Some(PipelineState::Faulted));

    // Before the backoff expires nothing happens.
    h.coordinator.tick(Instant::now());
    assert!(h.backend.state().resyncs.is_empty());

    h.coordinator.tick(Instant::now() + Duration::from_secs(60));
    assert_eq!(h.backend.state().resyncs, vec![id.clone()]);
    assert_eq!(h.coordinator.session_state(&id), Some(PipelineState::Playing));

    let notices = drain_notices(&h.coordinator);
    assert!(matches!(
        notices.as_slice(),
        [SessionNotice::Faulted { source_stage, .. }, SessionNotice::Recovered { .. }]
            if source_stage == "source"
    ));
}

#[test]
fn test_repeated_errors_while_faulted_schedule_once() {
    let mut h = default_harness();
    let id = h.playing_session("/output");
    for _ in 0..5 {
        bus(&h, &id, BusEvent::error("source", "timeout"));
    }
    h.coordinator.process_pending();

    let faulted = drain_notices(&h.coordinator)
        .into_iter()
        .filter(|n| matches!(n, SessionNotice::Faulted { .. }))
        .count();
    assert_eq!(faulted, 1);
    assert_eq!(h.coordinator.monitor().faults(&id).len(), 5);
}

#[test]
fn test_resync_gives_up_after_retry_budget() {
    let mut h = default_harness();
    h.backend.state().fail_resync = true;
    let id = h.playing_session("/output");

    bus(&h, &id, BusEvent::error("source", "Could not read from resource"));
    h.coordinator.process_pending();

    let start = Instant::now();
    for minute in 1..=3 {
        h.coordinator.tick(start + Duration::from_secs(60 * minute));
    }

    assert_eq!(h.backend.state().resyncs.len(), 3);
    assert_eq!(h.coordinator.session_count(), 0);
    assert!(h.coordinator.mounts().is_empty());
    assert!(!h.backend.state().published.contains_key("/output"));
    assert!(drain_notices(&h.coordinator).iter().any(|n| matches!(
        n,
        SessionNotice::TornDown { reason, .. } if reason.contains("3 resync attempts")
    )));
}

#[test]
fn test_fault_in_one_session_leaves_other_playing() {
    let mut h = default_harness();
    let first = h.playing_session("/output1");
    let second = h.playing_session("/output2");

    bus(&h, &first, BusEvent::error("source", "timeout"));
    h.coordinator.process_pending();

    assert_eq!(h.coordinator.session_state(&first), Some(PipelineState::Faulted));
    assert_eq!(
        h.coordinator.session_state(&second),
        Some(PipelineState::Playing)
    );
}

#[test]
fn test_shutdown_event_stops_run_loop() {
    let mut h = default_harness();
    h.playing_session("/output");
    h.coordinator.event_sender().send(LoopEvent::Shutdown);

    let flag = std::sync::atomic::AtomicBool::new(false);
    h.coordinator.run(&flag);

    assert_eq!(h.coordinator.session_count(), 0);
    assert!(h.backend.state().published.is_empty());
}

#[test]
fn test_configured_sessions_start() {
    let engine = common::engine_blob();
    let config: RelayConfig = serde_yaml::from_str(&format!(
        "sessions:\n  - ingest: rtsp://camera.local/a\n    publish_path: /a\n    engine: {}\n  - ingest: rtsp://camera.local/b\n    publish_path: /b\n",
        engine.path.display()
    ))
    .unwrap();
    let mut h = common::harness(common::ScriptedRuntime::echo(), config);

    let results = h.coordinator.start_configured_sessions();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(h.coordinator.mounts().paths(), vec!["/a".to_string(), "/b".to_string()]);
}
