use thiserror::Error;

/// Fatal transport failures. Any of these ends the session; there is no
/// implicit retry or reconnect.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("response body was not valid UTF-8")]
    InvalidUtf8,
}

/// A `data:` line that could not be turned into a chat event. Recoverable:
/// the caller logs it and skips the line.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed JSON in SSE data line: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SSE event is missing the `event` field")]
    MissingKind,
}

/// Malformed audio chunk data. Recoverable: the chunk (or frame) is skipped
/// and the assembler keeps scanning.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("MP3 decode failed: {0}")]
    Mp3(#[from] symphonia::core::errors::Error),

    #[error("no audio track in frame data")]
    NoTrack,
}

/// Rejections raised by `StreamSession::start` before or while opening the
/// transport.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
