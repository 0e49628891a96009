use chrono::{DateTime, Utc};

use super::session::SessionState;

/// Point-in-time snapshot of a session.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub state: SessionState,
    /// When the current (or last) run opened its stream
    pub started_at: Option<DateTime<Utc>>,
    /// Events surfaced to the sink since the session was created
    pub events_received: usize,
    /// Audio segments emitted since the session was created
    pub segments_emitted: usize,
    /// Bytes currently waiting in the audio buffer
    pub buffered_audio_bytes: usize,
}
