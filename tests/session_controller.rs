//! Session Controller Tests
//!
//! Drives the controller through its public handle with fake audio devices and
//! a fake channel, checking state transitions and resource ownership.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use zeroize::Zeroizing;

use common::{FakeAudioBackend, FakeConnector, TEST_TIMEOUT, eventually, silent_payload};
use live_reception::core::audio::CAPTURE_SAMPLE_RATE;
use live_reception::core::realtime::{
    ChannelConfig, ChannelEvent, InboundMessage, OutboundMessage, RealtimeError, ResponseModality,
};
use live_reception::core::tools::ToolCallStatus;
use live_reception::{
    AppointmentStore, BookAppointmentTool, SessionController, SessionError, SessionHandle,
    SessionSettings, SessionState, SessionStatus, ToolCallDispatcher, ToolCallRequest,
};

struct Harness {
    audio: Arc<FakeAudioBackend>,
    connector: Arc<FakeConnector>,
    store: AppointmentStore,
    session: SessionHandle,
    task: JoinHandle<()>,
}

fn settings(api_key: Option<&str>) -> SessionSettings {
    SessionSettings {
        api_key: api_key.map(|k| Zeroizing::new(k.to_string())),
        channel: ChannelConfig {
            model: "test-model".to_string(),
            system_instruction: "Sei Giovanni.".to_string(),
            response_modality: ResponseModality::Audio,
            voice: "Fenrir".to_string(),
            tools: Vec::new(),
        },
        frame_size: 256,
        capture_queue_capacity: 8,
    }
}

fn harness_with(api_key: Option<&str>, connector: Arc<FakeConnector>) -> Harness {
    let audio = FakeAudioBackend::new();
    let store = AppointmentStore::new();
    let tools = Arc::new(
        ToolCallDispatcher::new().with_handler(Arc::new(BookAppointmentTool::new(store.clone()))),
    );
    let controller = SessionController::new(
        settings(api_key),
        audio.clone(),
        connector.clone(),
        tools,
    );
    let (session, task) = controller.spawn();
    Harness {
        audio,
        connector,
        store,
        session,
        task,
    }
}

fn harness() -> Harness {
    harness_with(Some("test-key"), FakeConnector::new(true))
}

async fn wait_for_state(session: &SessionHandle, state: SessionState) -> SessionStatus {
    let mut status = session.status();
    let current = timeout(TEST_TIMEOUT, status.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .expect("controller stopped")
        .clone();
    current
}

async fn connected() -> Harness {
    let h = harness();
    h.session.start().await.unwrap();
    wait_for_state(&h.session, SessionState::Connected).await;
    h
}

#[tokio::test]
async fn test_missing_credential_fails_without_touching_devices() {
    for key in [None, Some("   ")] {
        let h = harness_with(key, FakeConnector::new(true));
        h.session.start().await.unwrap();

        let status = wait_for_state(&h.session, SessionState::Error).await;
        assert_eq!(status.error.as_deref(), Some("API Key mancante"));
        assert_eq!(h.audio.captures_opened(), 0);
        assert_eq!(h.audio.playbacks_opened(), 0);
        assert_eq!(h.connector.open_calls(), 0);
    }
}

#[tokio::test]
async fn test_start_connects_and_declares_tools() {
    let h = connected().await;

    assert_eq!(h.connector.api_key(0), "test-key");
    let config = h.connector.config(0);
    assert_eq!(config.model, "test-model");
    assert_eq!(config.tools.len(), 1);
    assert_eq!(config.tools[0].name, "bookAppointment");

    let snapshot = h.session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Connected);
    assert!(snapshot.channel_open);
    assert_eq!(snapshot.error, None);
    assert_eq!(h.audio.captures_opened(), 1);
    assert_eq!(h.audio.playbacks_opened(), 1);
}

#[tokio::test]
async fn test_restart_never_holds_two_channels() {
    let h = connected().await;

    h.session.start().await.unwrap();
    let snapshot = h.session.snapshot().await.unwrap();
    assert!(snapshot.state.is_active());
    assert!(h.connector.is_closed(0));
    assert_eq!(h.audio.captures_closed(), 1);
    assert_eq!(h.audio.playbacks_closed(), 1);

    wait_for_state(&h.session, SessionState::Connected).await;
    assert_eq!(h.connector.open_calls(), 2);
    assert_eq!(h.connector.open_channels(), 1);
    assert_eq!(h.audio.captures_opened(), 2);

    let snapshot = h.session.snapshot().await.unwrap();
    assert_eq!(snapshot.epoch, 2);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = connected().await;

    h.session.stop().await.unwrap();
    h.session.stop().await.unwrap();

    let snapshot = h.session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Disconnected);
    assert_eq!(snapshot.error, None);
    assert!(!snapshot.channel_open);
    assert_eq!(snapshot.active_sources, 0);
    assert_eq!(h.connector.open_channels(), 0);
    assert_eq!(h.audio.captures_closed(), 1);
    assert_eq!(h.audio.playbacks_closed(), 1);
}

#[tokio::test]
async fn test_double_stop_from_error() {
    let h = harness();
    h.connector
        .fail_open
        .store(true, std::sync::atomic::Ordering::SeqCst);
    h.session.start().await.unwrap();
    wait_for_state(&h.session, SessionState::Error).await;

    h.session.stop().await.unwrap();
    h.session.stop().await.unwrap();

    let snapshot = h.session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Disconnected);
    assert_eq!(snapshot.error, None);
    assert!(!snapshot.channel_open);
    assert_eq!(snapshot.active_sources, 0);
    assert_eq!(h.audio.captures_opened(), 1);
    assert_eq!(h.audio.captures_closed(), 1);
    assert_eq!(h.audio.playbacks_closed(), h.audio.playbacks_opened());
}

#[tokio::test]
async fn test_double_stop_from_connecting() {
    let h = harness_with(Some("test-key"), FakeConnector::new(false));
    h.session.start().await.unwrap();
    assert!(eventually(|| h.connector.open_channels() == 1).await);
    assert_eq!(
        h.session.snapshot().await.unwrap().state,
        SessionState::Connecting
    );

    h.session.stop().await.unwrap();
    h.session.stop().await.unwrap();

    let snapshot = h.session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Disconnected);
    assert_eq!(snapshot.error, None);
    assert!(!snapshot.channel_open);
    assert_eq!(snapshot.active_sources, 0);
    assert!(eventually(|| h.connector.open_channels() == 0).await);
    assert!(eventually(|| h.audio.captures_closed() == h.audio.captures_opened()).await);
    assert!(eventually(|| h.audio.playbacks_closed() == h.audio.playbacks_opened()).await);

    // A late open for the released channel changes nothing
    h.connector.emit(0, ChannelEvent::Open);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.session.current_status().state, SessionState::Disconnected);
}

#[tokio::test]
async fn test_stop_from_idle() {
    let h = harness();
    h.session.stop().await.unwrap();

    let snapshot = h.session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Disconnected);
    assert_eq!(h.audio.captures_opened(), 0);
}

#[tokio::test]
async fn test_toggle() {
    let h = harness();

    h.session.toggle().await.unwrap();
    wait_for_state(&h.session, SessionState::Connected).await;

    h.session.toggle().await.unwrap();
    let snapshot = h.session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Disconnected);
    assert_eq!(h.connector.open_channels(), 0);

    h.session.toggle().await.unwrap();
    wait_for_state(&h.session, SessionState::Connected).await;
    assert_eq!(h.connector.open_calls(), 2);
}

#[tokio::test]
async fn test_toggle_from_error_retries() {
    let h = harness_with(Some("test-key"), FakeConnector::new(true));
    h.connector
        .fail_open
        .store(true, std::sync::atomic::Ordering::SeqCst);

    h.session.start().await.unwrap();
    wait_for_state(&h.session, SessionState::Error).await;

    h.connector
        .fail_open
        .store(false, std::sync::atomic::Ordering::SeqCst);
    h.session.toggle().await.unwrap();
    let status = wait_for_state(&h.session, SessionState::Connected).await;
    assert_eq!(status.error, None);
}

#[tokio::test]
async fn test_stop_while_connecting_releases_late_setup() {
    let h = harness_with(Some("test-key"), FakeConnector::new(false));

    h.session.start().await.unwrap();
    assert_eq!(
        h.session.snapshot().await.unwrap().state,
        SessionState::Connecting
    );

    h.session.toggle().await.unwrap();
    assert_eq!(
        h.session.snapshot().await.unwrap().state,
        SessionState::Disconnected
    );

    assert!(eventually(|| h.connector.open_channels() == 0).await);
    assert!(eventually(|| h.audio.captures_closed() == h.audio.captures_opened()).await);
    assert!(eventually(|| h.audio.playbacks_closed() == h.audio.playbacks_opened()).await);
    assert_eq!(h.session.current_status().state, SessionState::Disconnected);
}

#[tokio::test]
async fn test_microphone_denied() {
    let h = harness();
    h.audio
        .fail_capture
        .store(true, std::sync::atomic::Ordering::SeqCst);

    h.session.start().await.unwrap();
    let status = wait_for_state(&h.session, SessionState::Error).await;
    assert_eq!(
        status.error.as_deref(),
        Some("Impossibile accedere al microfono. Controlla i permessi.")
    );
    assert_eq!(h.connector.open_calls(), 0);
    assert_eq!(h.audio.playbacks_opened(), 0);
}

#[tokio::test]
async fn test_connect_failure_closes_devices() {
    let h = harness();
    h.connector
        .fail_open
        .store(true, std::sync::atomic::Ordering::SeqCst);

    h.session.start().await.unwrap();
    let status = wait_for_state(&h.session, SessionState::Error).await;
    assert_eq!(
        status.error.as_deref(),
        Some("Errore di connessione. Riprova.")
    );
    assert_eq!(h.audio.captures_closed(), 1);
    assert_eq!(h.audio.playbacks_closed(), 1);
}

#[tokio::test]
async fn test_audio_captured_before_open_is_discarded() {
    let h = harness_with(Some("test-key"), FakeConnector::new(false));
    h.session.start().await.unwrap();
    assert!(eventually(|| h.connector.open_calls() == 1 && h.connector.open_channels() == 1).await);

    // Fill the capture queue while the service is still setting up
    let mut outbound = h.connector.take_outbound(0);
    for sequence in 0..8u64 {
        h.audio.push_frame(vec![0.25; 256], sequence).await;
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(outbound.try_recv().is_err());

    h.connector.emit(0, ChannelEvent::Open);
    wait_for_state(&h.session, SessionState::Connected).await;
    h.audio.push_frame(vec![-0.25; 256], 100).await;
    h.audio.push_frame(vec![-0.25; 256], 101).await;

    for expected in [100u64, 101] {
        match timeout(TEST_TIMEOUT, outbound.recv()).await.unwrap() {
            Some(OutboundMessage::Audio(chunk)) => {
                assert_eq!(chunk.sequence, expected);
                assert_eq!(chunk.sample_rate, CAPTURE_SAMPLE_RATE);
            }
            other => panic!("unexpected outbound message: {other:?}"),
        }
    }

    let session = h.session.clone();
    let mut sent = 0;
    for _ in 0..100 {
        sent = session.snapshot().await.unwrap().chunks_sent;
        if sent == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(sent, 2);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(outbound.try_recv().is_err());
}

#[tokio::test]
async fn test_tool_call_books_appointment_and_replies() {
    let h = connected().await;
    let mut outbound = h.connector.take_outbound(0);

    let args = json!({"patientName": "Mario Rossi", "date": "Lunedì", "time": "10:00"});
    h.connector.emit(
        0,
        ChannelEvent::Message(InboundMessage::ToolCall(vec![ToolCallRequest {
            id: "call-1".to_string(),
            name: "bookAppointment".to_string(),
            args: args.as_object().cloned().unwrap(),
        }])),
    );

    let result = loop {
        match timeout(TEST_TIMEOUT, outbound.recv()).await.unwrap() {
            Some(OutboundMessage::ToolResponse(result)) => break result,
            Some(OutboundMessage::Audio(_)) => continue,
            None => panic!("outbound queue closed"),
        }
    };
    assert_eq!(result.id, "call-1");
    assert_eq!(result.status, ToolCallStatus::Success);
    assert_eq!(result.response["result"], "success");
    let message = result.message().unwrap();
    assert!(message.contains("Mario Rossi"));

    let booked = h.store.list();
    assert_eq!(booked.len(), 1);
    assert_eq!(booked[0].visit_type, "Generale");
    assert_eq!(h.session.current_status().state, SessionState::Connected);
}

#[tokio::test]
async fn test_unknown_tool_gets_error_response() {
    let h = connected().await;
    let mut outbound = h.connector.take_outbound(0);

    h.connector.emit(
        0,
        ChannelEvent::Message(InboundMessage::ToolCall(vec![ToolCallRequest {
            id: "call-9".to_string(),
            name: "cancelAppointment".to_string(),
            args: Default::default(),
        }])),
    );

    match timeout(TEST_TIMEOUT, outbound.recv()).await.unwrap() {
        Some(OutboundMessage::ToolResponse(result)) => {
            assert_eq!(result.id, "call-9");
            assert_eq!(result.status, ToolCallStatus::Error);
        }
        other => panic!("unexpected outbound message: {other:?}"),
    }
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_remote_close_disconnects_without_error() {
    let h = connected().await;

    h.connector.emit(
        0,
        ChannelEvent::Closed {
            reason: Some("bye".to_string()),
        },
    );
    let status = wait_for_state(&h.session, SessionState::Disconnected).await;
    assert_eq!(status.error, None);
    assert!(h.connector.is_closed(0));
    assert_eq!(h.audio.captures_closed(), 1);
}

#[tokio::test]
async fn test_transport_error_lands_in_error_state() {
    let h = connected().await;

    h.connector.emit(
        0,
        ChannelEvent::Error(RealtimeError::WebSocketError("reset".into())),
    );
    let status = wait_for_state(&h.session, SessionState::Error).await;
    assert_eq!(
        status.error.as_deref(),
        Some("Errore di connessione. Riprova.")
    );
    assert!(h.connector.is_closed(0));
    assert_eq!(h.audio.playbacks_closed(), 1);

    let snapshot = h.session.snapshot().await.unwrap();
    assert!(!snapshot.channel_open);
}

#[tokio::test]
async fn test_events_from_released_channel_are_ignored() {
    let h = connected().await;
    h.session.stop().await.unwrap();
    assert_eq!(
        h.session.snapshot().await.unwrap().state,
        SessionState::Disconnected
    );

    h.connector.emit(
        0,
        ChannelEvent::Error(RealtimeError::WebSocketError("late".into())),
    );
    h.connector.emit(
        0,
        ChannelEvent::Message(InboundMessage::Audio(silent_payload(2400))),
    );
    tokio::time::sleep(Duration::from_millis(30)).await;

    let snapshot = h.session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Disconnected);
    assert_eq!(snapshot.error, None);
    assert!(h.audio.scheduled().is_empty());
}

#[tokio::test]
async fn test_audio_is_scheduled_back_to_back() {
    let h = connected().await;
    h.audio.set_clock(0.05);

    for _ in 0..2 {
        h.connector.emit(
            0,
            ChannelEvent::Message(InboundMessage::Audio(silent_payload(2400))),
        );
    }
    assert!(eventually(|| h.audio.scheduled().len() == 2).await);

    let scheduled = h.audio.scheduled();
    assert!((scheduled[0].start - 0.05).abs() < 1e-9);
    assert!((scheduled[0].duration - 0.1).abs() < 1e-9);
    assert!((scheduled[1].start - 0.15).abs() < 1e-9);

    // Queue ran dry: the next buffer starts now, not in the past
    h.audio.set_clock(1.0);
    h.connector.emit(
        0,
        ChannelEvent::Message(InboundMessage::Audio(silent_payload(2400))),
    );
    assert!(eventually(|| h.audio.scheduled().len() == 3).await);
    assert!((h.audio.scheduled()[2].start - 1.0).abs() < 1e-9);

    h.audio.end_source(scheduled[0].id);
    let mut active = usize::MAX;
    for _ in 0..100 {
        active = h.session.snapshot().await.unwrap().active_sources;
        if active == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(active, 2);
}

#[tokio::test]
async fn test_interruption_flushes_playback() {
    let h = connected().await;

    for _ in 0..2 {
        h.connector.emit(
            0,
            ChannelEvent::Message(InboundMessage::Audio(silent_payload(4800))),
        );
    }
    assert!(eventually(|| h.audio.scheduled().len() == 2).await);

    h.connector
        .emit(0, ChannelEvent::Message(InboundMessage::Interrupted));
    assert!(eventually(|| h.audio.stopped().len() == 2).await);

    let snapshot = h.session.snapshot().await.unwrap();
    assert_eq!(snapshot.active_sources, 0);
    assert_eq!(snapshot.next_start, 0.0);
    assert_eq!(snapshot.state, SessionState::Connected);
}

#[tokio::test]
async fn test_invalid_audio_chunk_is_dropped() {
    let h = connected().await;

    h.connector.emit(
        0,
        ChannelEvent::Message(InboundMessage::Audio("not base64!".to_string())),
    );
    h.connector.emit(
        0,
        ChannelEvent::Message(InboundMessage::Audio(silent_payload(240))),
    );
    assert!(eventually(|| h.audio.scheduled().len() == 1).await);

    let status = h.session.current_status();
    assert_eq!(status.state, SessionState::Connected);
    assert_eq!(status.error, None);
}

#[tokio::test]
async fn test_shutdown_releases_and_ends_controller() {
    let h = connected().await;

    h.session.shutdown().await.unwrap();
    timeout(TEST_TIMEOUT, h.task).await.unwrap().unwrap();

    assert_eq!(h.connector.open_channels(), 0);
    assert_eq!(h.audio.captures_closed(), 1);
    assert!(matches!(
        h.session.start().await,
        Err(SessionError::ControllerStopped)
    ));
}
