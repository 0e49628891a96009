// Integration tests for the streaming session, driven by the scripted
// transport. Event receipt is the synchronization point: once an event is
// out of the sink, the read loop has already routed its audio and task id.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dify_stream::client::mock::{MockTransport, ScriptedLine};
use dify_stream::{
    AssemblerConfig, AudioFrameAssembler, ChatEvent, SessionState, SilenceDetector, StreamSession,
};

const FRAME_LEN: usize = 417;
const SILENT: u8 = 0x00;
const LOUD: u8 = 0x77;

fn frame(marker: u8) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xFB, 0x90, 0x44];
    bytes.push(marker);
    bytes.resize(FRAME_LEN, 0x11);
    bytes
}

struct MarkerDetector;

impl SilenceDetector for MarkerDetector {
    fn is_silent(&self, span: &[u8]) -> bool {
        span.len() > 4 && span[4] == SILENT
    }
}

fn test_session(
    transport: Arc<MockTransport>,
    flush_threshold: usize,
) -> (StreamSession, dify_stream::SessionSinks) {
    let config = AssemblerConfig {
        flush_threshold_bytes: flush_threshold,
        max_buffer_bytes: 1024 * 1024,
        ..AssemblerConfig::default()
    };
    let assembler = AudioFrameAssembler::with_detector(config, Box::new(MarkerDetector));
    StreamSession::with_assembler(transport, "test-user", assembler)
}

fn message_line(task_id: &str, answer: &str) -> String {
    format!("data: {{\"event\":\"message\",\"task_id\":\"{task_id}\",\"answer\":\"{answer}\"}}")
}

fn message_end_line(task_id: &str, conversation_id: &str) -> String {
    format!(
        "data: {{\"event\":\"message_end\",\"task_id\":\"{task_id}\",\"conversation_id\":\"{conversation_id}\"}}"
    )
}

fn tts_line(task_id: &str, audio: &[u8]) -> String {
    format!(
        "data: {{\"event\":\"tts_message\",\"task_id\":\"{task_id}\",\"audio\":\"{}\"}}",
        BASE64.encode(audio)
    )
}

async fn wait_for_state(session: &StreamSession, want: SessionState) {
    for _ in 0..200 {
        if session.state().await == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "timed out waiting for {:?}, still {:?}",
        want,
        session.state().await
    );
}

#[tokio::test]
async fn test_events_surface_in_arrival_order() {
    let transport = Arc::new(MockTransport::new());
    transport.push_script([
        message_line("t-1", "Hel"),
        String::new(), // blank separator, not an event
        message_line("t-1", "lo"),
        "data: {\"event\":\"agent_thought\",\"thought\":\"x\"}".to_string(),
        message_end_line("t-1", "conv-1"),
        "data: {\"event\":\"ping\"}".to_string(),
    ]);

    let (session, mut sinks) = test_session(transport, 80 * 1024);
    session.start("hello", Default::default(), None).await.unwrap();

    let mut kinds = Vec::new();
    for _ in 0..5 {
        let event = sinks.events.recv().await.expect("event");
        kinds.push(event.kind().to_string());
    }
    assert_eq!(
        kinds,
        ["message", "message", "agent_thought", "message_end", "ping"]
    );

    wait_for_state(&session, SessionState::Completed).await;
    assert_eq!(session.conversation_id().await.as_deref(), Some("conv-1"));
    assert!(session.active_tasks().await.contains("t-1"));
}

#[tokio::test]
async fn test_empty_query_is_rejected_before_connecting() {
    let transport = Arc::new(MockTransport::new());
    let (session, _sinks) = test_session(Arc::clone(&transport), 80 * 1024);

    assert!(session.start("   ", Default::default(), None).await.is_err());
    assert_eq!(session.state().await, SessionState::Idle);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_failed_open_fails_the_session() {
    let transport = Arc::new(MockTransport::new());
    transport.fail_opens(1);

    let (session, _sinks) = test_session(transport, 80 * 1024);
    let result = session.start("hello", Default::default(), None).await;

    assert!(result.is_err());
    assert_eq!(session.state().await, SessionState::Failed);
    assert!(session.last_error().await.is_some());
}

#[tokio::test]
async fn test_malformed_data_line_is_skipped_not_fatal() {
    let transport = Arc::new(MockTransport::new());
    transport.push_script([
        "data: not-json".to_string(),
        "data: {\"event\":\"ping\"}".to_string(),
    ]);

    let (session, mut sinks) = test_session(transport, 80 * 1024);
    session.start("hello", Default::default(), None).await.unwrap();

    let event = sinks.events.recv().await.unwrap();
    assert!(matches!(event, ChatEvent::Ping));
    wait_for_state(&session, SessionState::Completed).await;
}

#[tokio::test]
async fn test_mid_stream_transport_error_fails_the_session() {
    let transport = Arc::new(MockTransport::new());
    let tx = transport.push_stream();

    let (session, mut sinks) = test_session(transport, 80 * 1024);
    session.start("hello", Default::default(), None).await.unwrap();

    tx.send(ScriptedLine::Line(message_line("t-1", "partial"))).unwrap();
    assert!(sinks.events.recv().await.is_some());

    tx.send(ScriptedLine::Error("connection reset".to_string())).unwrap();
    wait_for_state(&session, SessionState::Failed).await;

    let error = session.last_error().await.expect("error recorded");
    assert!(error.contains("connection reset"));
}

#[tokio::test]
async fn test_tts_chunks_become_segments_and_end_forces_a_flush() {
    let transport = Arc::new(MockTransport::new());
    transport.push_script([
        tts_line("t-1", &frame(LOUD)),
        tts_line("t-1", &frame(SILENT)),
        tts_line("t-1", &frame(LOUD)),
        "data: {\"event\":\"tts_message_end\",\"task_id\":\"t-1\",\"audio\":\"\"}".to_string(),
    ]);

    // Tiny threshold so the second chunk already crosses it
    let (session, mut sinks) = test_session(transport, 100);
    session.start("hello", Default::default(), None).await.unwrap();

    let first = sinks.segments.recv().await.expect("silent-cut segment");
    assert_eq!(first.bytes, [frame(LOUD), frame(SILENT)].concat());

    let second = sinks.segments.recv().await.expect("forced end segment");
    assert_eq!(second.bytes, frame(LOUD));

    wait_for_state(&session, SessionState::Completed).await;
    assert_eq!(session.assembler().buffered_bytes(), 0);
}

#[tokio::test]
async fn test_stop_cancels_and_clears_everything() {
    let transport = Arc::new(MockTransport::new());
    let tx = transport.push_stream();

    let (session, mut sinks) = test_session(Arc::clone(&transport), 80 * 1024);
    session.start("hello", Default::default(), None).await.unwrap();

    // A couple of tasks and some buffered audio below the flush threshold
    tx.send(ScriptedLine::Line(message_line("t-1", "a"))).unwrap();
    tx.send(ScriptedLine::Line(tts_line("t-2", &frame(LOUD)))).unwrap();
    for _ in 0..2 {
        sinks.events.recv().await.unwrap();
    }
    assert_eq!(session.active_tasks().await.len(), 2);
    assert!(session.assembler().buffered_bytes() > 0);

    session.stop().await;

    assert_eq!(session.state().await, SessionState::Cancelled);
    assert!(session.active_tasks().await.is_empty());
    assert_eq!(session.assembler().buffered_bytes(), 0);

    // Stop-generation requests go out for every observed task
    for _ in 0..200 {
        if transport.stop_calls().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let mut stopped = transport.stop_calls();
    stopped.sort();
    assert_eq!(stopped, ["t-1", "t-2"]);

    drop(tx);
}

#[tokio::test]
async fn test_next_session_starts_with_an_empty_task_set() {
    let transport = Arc::new(MockTransport::new());
    transport.push_script([message_line("t-old", "bye")]);

    let (session, mut sinks) = test_session(Arc::clone(&transport), 80 * 1024);
    session.start("first", Default::default(), None).await.unwrap();
    sinks.events.recv().await.unwrap();
    wait_for_state(&session, SessionState::Completed).await;

    session.stop().await;
    assert!(session.active_tasks().await.is_empty());

    transport.push_script([message_line("t-new", "hi")]);
    session.start("second", Default::default(), None).await.unwrap();
    sinks.events.recv().await.unwrap();

    let tasks = session.active_tasks().await;
    assert!(tasks.contains("t-new"));
    assert!(!tasks.contains("t-old"));
}

#[tokio::test]
async fn test_starting_while_active_is_an_implicit_stop() {
    let transport = Arc::new(MockTransport::new());
    let tx = transport.push_stream();

    let (session, mut sinks) = test_session(Arc::clone(&transport), 80 * 1024);
    session.start("first", Default::default(), None).await.unwrap();

    tx.send(ScriptedLine::Line(message_line("t-1", "a"))).unwrap();
    sinks.events.recv().await.unwrap();
    assert!(session.active_tasks().await.contains("t-1"));

    transport.push_script([message_end_line("t-2", "conv-2")]);
    session.start("second", Default::default(), None).await.unwrap();

    // The first run's task was stopped and forgotten
    assert!(!session.active_tasks().await.contains("t-1"));
    for _ in 0..200 {
        if !transport.stop_calls().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(transport.stop_calls(), ["t-1"]);
    assert_eq!(transport.requests().len(), 2);

    wait_for_state(&session, SessionState::Completed).await;
    drop(tx);
}

#[tokio::test]
async fn test_conversation_id_is_echoed_on_the_next_turn() {
    let transport = Arc::new(MockTransport::new());
    transport.push_script([message_end_line("t-1", "conv-42")]);

    let (session, mut sinks) = test_session(Arc::clone(&transport), 80 * 1024);
    session.start("first", Default::default(), None).await.unwrap();
    sinks.events.recv().await.unwrap();
    wait_for_state(&session, SessionState::Completed).await;

    transport.push_script([message_line("t-2", "again")]);
    session.start("second", Default::default(), None).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].conversation_id, "");
    assert_eq!(requests[1].conversation_id, "conv-42");
}
