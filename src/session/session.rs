use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::stats::SessionStats;
use crate::audio::{AssemblerConfig, AudioFrameAssembler, AudioSegment};
use crate::client::types::{ChatRequest, FileAttachment};
use crate::client::{EventStreamBody, StreamTransport};
use crate::error::SessionError;
use crate::event::{ChatEvent, ChatEventParser};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const SEGMENT_CHANNEL_CAPACITY: usize = 32;

/// Lifecycle of a streaming chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    /// Connecting or Streaming; at most one run may be active per session.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Streaming)
    }
}

/// Receiving ends of the session's ordered sinks. Events and audio segments
/// arrive at most once each, in the order produced.
pub struct SessionSinks {
    pub events: mpsc::Receiver<ChatEvent>,
    pub segments: mpsc::Receiver<AudioSegment>,
}

/// A streaming chat session over the Dify SSE protocol.
///
/// One long-lived read loop per active run feeds the event parser and the
/// audio assembler, surfacing events and assembled segments through bounded
/// channels. Cancellation is cooperative: `stop` raises a per-run flag that
/// the loop polls at each line boundary, so teardown may lag by one read.
/// The flag belongs to the run, not the session, which keeps a stale loop
/// from being revived by a later `start`.
pub struct StreamSession {
    transport: Arc<dyn StreamTransport>,
    user: String,
    assembler: Arc<AudioFrameAssembler>,
    parser: Arc<Mutex<ChatEventParser>>,
    conversation_id: Arc<Mutex<Option<String>>>,
    state: Arc<Mutex<SessionState>>,
    last_error: Arc<Mutex<Option<String>>>,
    started_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    events_received: Arc<AtomicUsize>,
    segments_emitted: Arc<AtomicUsize>,
    run_cancel: Mutex<Option<Arc<AtomicBool>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    event_tx: mpsc::Sender<ChatEvent>,
    segment_tx: mpsc::Sender<AudioSegment>,
}

impl StreamSession {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        user: impl Into<String>,
        assembler_config: AssemblerConfig,
    ) -> (Self, SessionSinks) {
        Self::with_assembler(transport, user, AudioFrameAssembler::new(assembler_config))
    }

    /// Build with a preconfigured assembler (custom silence detector).
    pub fn with_assembler(
        transport: Arc<dyn StreamTransport>,
        user: impl Into<String>,
        assembler: AudioFrameAssembler,
    ) -> (Self, SessionSinks) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (segment_tx, segment_rx) = mpsc::channel(SEGMENT_CHANNEL_CAPACITY);

        let session = Self {
            transport,
            user: user.into(),
            assembler: Arc::new(assembler),
            parser: Arc::new(Mutex::new(ChatEventParser::new())),
            conversation_id: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            last_error: Arc::new(Mutex::new(None)),
            started_at: Arc::new(Mutex::new(None)),
            events_received: Arc::new(AtomicUsize::new(0)),
            segments_emitted: Arc::new(AtomicUsize::new(0)),
            run_cancel: Mutex::new(None),
            read_task: Mutex::new(None),
            event_tx,
            segment_tx,
        };
        let sinks = SessionSinks {
            events: event_rx,
            segments: segment_rx,
        };
        (session, sinks)
    }

    /// Open the streaming endpoint and spawn the read loop.
    ///
    /// An empty query is rejected before any network traffic. Starting while
    /// a run is active is an implicit stop-then-start. The server-assigned
    /// conversation id from earlier completed turns is echoed back, keeping
    /// multi-turn context.
    pub async fn start(
        &self,
        query: &str,
        inputs: Map<String, Value>,
        attachment_file_id: Option<String>,
    ) -> Result<(), SessionError> {
        if query.trim().is_empty() {
            return Err(SessionError::EmptyQuery);
        }

        if self.state().await.is_active() {
            info!("session already active, stopping it first");
            self.stop().await;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        *self.run_cancel.lock().await = Some(Arc::clone(&cancel));
        *self.last_error.lock().await = None;
        *self.state.lock().await = SessionState::Connecting;

        let conversation_id = self.conversation_id.lock().await.clone();
        let request = ChatRequest {
            inputs,
            query: query.to_string(),
            response_mode: "streaming".to_string(),
            conversation_id: conversation_id.unwrap_or_default(),
            user: self.user.clone(),
            files: attachment_file_id
                .into_iter()
                .map(FileAttachment::local_image)
                .collect(),
        };

        let mut body = match self.transport.open_chat_stream(&request).await {
            Ok(body) => body,
            Err(e) => {
                error!("failed to open chat stream: {}", e);
                *self.last_error.lock().await = Some(e.to_string());
                *self.state.lock().await = SessionState::Failed;
                return Err(e.into());
            }
        };

        *self.started_at.lock().await = Some(Utc::now());
        *self.state.lock().await = SessionState::Streaming;
        info!("chat stream open");

        let parser = Arc::clone(&self.parser);
        let assembler = Arc::clone(&self.assembler);
        let conversation_id = Arc::clone(&self.conversation_id);
        let state = Arc::clone(&self.state);
        let last_error = Arc::clone(&self.last_error);
        let events_received = Arc::clone(&self.events_received);
        let segments_emitted = Arc::clone(&self.segments_emitted);
        let event_tx = self.event_tx.clone();
        let segment_tx = self.segment_tx.clone();

        // The run's read loop: pull lines until cancellation, end of stream,
        // or a transport error. Terminal state writes re-check the
        // cancellation flag under the state lock so a concurrent stop wins.
        let task = tokio::spawn(async move {
            loop {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }

                match body.next_line().await {
                    Ok(Some(line)) => {
                        if cancel.load(Ordering::SeqCst) {
                            break;
                        }
                        if line.trim().is_empty() {
                            continue;
                        }

                        let parsed = parser.lock().await.parse_line(&line);
                        let event = match parsed {
                            Ok(Some(event)) => event,
                            Ok(None) => continue,
                            Err(e) => {
                                warn!("skipping malformed SSE line: {}", e);
                                continue;
                            }
                        };

                        match &event {
                            ChatEvent::TtsMessage(tts) if !tts.audio.is_empty() => {
                                match assembler.add_chunk(&tts.audio) {
                                    Ok(Some(segment)) => {
                                        emit_segment(&segment_tx, &segments_emitted, segment)
                                            .await;
                                    }
                                    Ok(None) => {}
                                    Err(e) => warn!("skipping malformed audio chunk: {}", e),
                                }
                            }
                            ChatEvent::TtsMessageEnd(_) => {
                                if let Some(segment) = assembler.flush(true) {
                                    emit_segment(&segment_tx, &segments_emitted, segment).await;
                                }
                            }
                            ChatEvent::MessageEnd(end) => {
                                if let Some(id) = &end.conversation_id {
                                    *conversation_id.lock().await = Some(id.clone());
                                }
                            }
                            _ => {}
                        }

                        if event_tx.send(event).await.is_err() {
                            warn!("event sink closed, ending read loop");
                            break;
                        }
                        events_received.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(None) => {
                        let mut state = state.lock().await;
                        if !cancel.load(Ordering::SeqCst) {
                            info!("chat stream completed");
                            *state = SessionState::Completed;
                        }
                        break;
                    }
                    Err(e) => {
                        let mut state = state.lock().await;
                        if !cancel.load(Ordering::SeqCst) {
                            error!("transport error while streaming: {}", e);
                            *last_error.lock().await = Some(e.to_string());
                            *state = SessionState::Failed;
                        }
                        break;
                    }
                }
            }
        });
        *self.read_task.lock().await = Some(task);

        Ok(())
    }

    /// Cancel the active run.
    ///
    /// Raises the cancellation flag, transitions to Cancelled, fires a
    /// best-effort stop-generation request for every task id observed on this
    /// stream, then clears the task set and the audio buffer. The read loop
    /// winds down on its own at the next line boundary; an in-flight socket
    /// read is not aborted.
    pub async fn stop(&self) {
        info!("stopping session");

        if let Some(cancel) = self.run_cancel.lock().await.take() {
            cancel.store(true, Ordering::SeqCst);
        }
        *self.state.lock().await = SessionState::Cancelled;

        // Detach the read task; it exits at the next line boundary
        self.read_task.lock().await.take();

        let tasks = self.parser.lock().await.take_tasks();
        for task_id in tasks {
            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                if let Err(e) = transport.stop_generation(&task_id).await {
                    warn!(%task_id, "stop-generation request failed: {}", e);
                }
            });
        }

        self.assembler.reset();
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Message of the transport error that failed the session, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.lock().await.clone()
    }

    /// Server-assigned conversation id, set once the first turn completes.
    pub async fn conversation_id(&self) -> Option<String> {
        self.conversation_id.lock().await.clone()
    }

    /// Task ids observed on the current stream.
    pub async fn active_tasks(&self) -> HashSet<String> {
        self.parser.lock().await.active_tasks().clone()
    }

    /// The audio assembler, for a playback poller that wants to flush
    /// pending audio itself.
    pub fn assembler(&self) -> &Arc<AudioFrameAssembler> {
        &self.assembler
    }

    /// Current session statistics.
    pub async fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state().await,
            started_at: *self.started_at.lock().await,
            events_received: self.events_received.load(Ordering::Relaxed),
            segments_emitted: self.segments_emitted.load(Ordering::Relaxed),
            buffered_audio_bytes: self.assembler.buffered_bytes(),
        }
    }
}

async fn emit_segment(
    tx: &mpsc::Sender<AudioSegment>,
    counter: &AtomicUsize,
    segment: AudioSegment,
) {
    if tx.send(segment).await.is_err() {
        warn!("segment sink closed, dropping audio segment");
        return;
    }
    counter.fetch_add(1, Ordering::Relaxed);
}
