//! Scripted in-memory transport for exercising sessions without a server.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::transport::{EventStreamBody, StreamTransport};
use super::types::ChatRequest;
use crate::error::TransportError;

/// One scripted item of a mock SSE body.
#[derive(Debug, Clone)]
pub enum ScriptedLine {
    Line(String),
    /// Simulate a mid-stream transport failure.
    Error(String),
}

/// A `StreamTransport` that replays scripted streams and records every
/// request made against it.
///
/// Each `open_chat_stream` call consumes the next queued stream. Lines can be
/// queued up front with `push_script`, or fed live through the sender
/// returned by `push_stream` to control timing from a test.
#[derive(Default)]
pub struct MockTransport {
    streams: Mutex<VecDeque<mpsc::UnboundedReceiver<ScriptedLine>>>,
    requests: Mutex<Vec<ChatRequest>>,
    stop_calls: Mutex<Vec<String>>,
    fail_opens: Mutex<u32>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a stream and hand back its sender. The body yields end-of-stream
    /// once the sender is dropped.
    pub fn push_stream(&self) -> mpsc::UnboundedSender<ScriptedLine> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().push_back(rx);
        tx
    }

    /// Queue a fully scripted stream that ends after the given lines.
    pub fn push_script<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tx = self.push_stream();
        for line in lines {
            let _ = tx.send(ScriptedLine::Line(line.into()));
        }
    }

    /// Make the next `n` open calls fail with a 503.
    pub fn fail_opens(&self, n: u32) {
        *self.fail_opens.lock().unwrap() = n;
    }

    /// Chat requests seen so far, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Task ids passed to `stop_generation`, in order.
    pub fn stop_calls(&self) -> Vec<String> {
        self.stop_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn open_chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<Box<dyn EventStreamBody>, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        {
            let mut fail = self.fail_opens.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(TransportError::Status {
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    body: "scripted open failure".to_string(),
                });
            }
        }

        let rx = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Status {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "no scripted stream queued".to_string(),
            })?;
        Ok(Box::new(MockBody { rx }))
    }

    async fn stop_generation(&self, task_id: &str) -> Result<(), TransportError> {
        self.stop_calls.lock().unwrap().push(task_id.to_string());
        Ok(())
    }
}

struct MockBody {
    rx: mpsc::UnboundedReceiver<ScriptedLine>,
}

#[async_trait]
impl EventStreamBody for MockBody {
    async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        match self.rx.recv().await {
            Some(ScriptedLine::Line(line)) => Ok(Some(line)),
            Some(ScriptedLine::Error(message)) => Err(TransportError::Status {
                status: reqwest::StatusCode::BAD_GATEWAY,
                body: message,
            }),
            None => Ok(None),
        }
    }
}
