use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::types::ChatRequest;
use crate::error::TransportError;

/// The streaming side of the chat API: open a streaming POST, then read the
/// body one line at a time, plus the companion stop-generation endpoint.
///
/// `StreamSession` only ever talks to this trait; `DifyClient` is the HTTP
/// implementation and `mock::MockTransport` the scripted one for tests.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open `/chat-messages` in streaming mode. Resolves once response
    /// headers arrive; a non-2xx status is a `TransportError`.
    async fn open_chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<Box<dyn EventStreamBody>, TransportError>;

    /// `POST /chat-messages/{task_id}/stop`. Best effort; the session logs
    /// failures and does not retry.
    async fn stop_generation(&self, task_id: &str) -> Result<(), TransportError>;
}

/// Incremental line reader over an open SSE response body.
#[async_trait]
pub trait EventStreamBody: Send {
    /// The next line without its trailing newline, or `Ok(None)` once the
    /// server closes the stream.
    async fn next_line(&mut self) -> Result<Option<String>, TransportError>;
}

/// Reassembles lines from a chunked byte stream. Chunk boundaries fall
/// anywhere, so a partial trailing line stays buffered until the rest of it
/// arrives.
pub(crate) struct SseLineStream {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buf: Vec<u8>,
    done: bool,
}

impl SseLineStream {
    pub(crate) fn new(
        stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    ) -> Self {
        Self {
            stream: Box::pin(stream),
            buf: Vec::new(),
            done: false,
        }
    }

    fn take_line(&mut self, newline_at: usize) -> Result<Option<String>, TransportError> {
        let mut line: Vec<u8> = self.buf.drain(..=newline_at).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line)
            .map(Some)
            .map_err(|_| TransportError::InvalidUtf8)
    }
}

#[async_trait]
impl EventStreamBody for SseLineStream {
    async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                return self.take_line(pos);
            }

            if self.done {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                // Stream closed without a final newline
                let line = std::mem::take(&mut self.buf);
                return String::from_utf8(line)
                    .map(Some)
                    .map_err(|_| TransportError::InvalidUtf8);
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e.into()),
                None => self.done = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(chunks: Vec<&'static [u8]>) -> SseLineStream {
        SseLineStream::new(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let mut body = stream_of(vec![
            b"data: {\"ev".as_slice(),
            b"ent\":\"ping\"}\n\nda".as_slice(),
            b"ta: x\n".as_slice(),
        ]);
        assert_eq!(
            body.next_line().await.unwrap().as_deref(),
            Some("data: {\"event\":\"ping\"}")
        );
        assert_eq!(body.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(body.next_line().await.unwrap().as_deref(), Some("data: x"));
        assert_eq!(body.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_crlf_line_endings() {
        let mut body = stream_of(vec![b"a\r\nb\r\n".as_slice()]);
        assert_eq!(body.next_line().await.unwrap().as_deref(), Some("a"));
        assert_eq!(body.next_line().await.unwrap().as_deref(), Some("b"));
        assert_eq!(body.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unterminated_final_line_is_returned() {
        let mut body = stream_of(vec![b"data: tail".as_slice()]);
        assert_eq!(body.next_line().await.unwrap().as_deref(), Some("data: tail"));
        assert_eq!(body.next_line().await.unwrap(), None);
    }
}
