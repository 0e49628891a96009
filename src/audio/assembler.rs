use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use super::frame::{frame_length_at, is_frame_sync};
use super::silence::{PcmSilenceDetector, SilenceDetector};
use crate::error::DecodeError;

/// Tuning for the frame assembler.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Buffered bytes above which `add_chunk` attempts an extraction.
    pub flush_threshold_bytes: usize,

    /// Hard ceiling on buffer growth. Continuously non-silent audio never
    /// produces a silence cut, so once the buffer passes this bound the next
    /// extraction runs in forced mode.
    pub max_buffer_bytes: usize,

    /// Peak amplitude below which a decoded frame counts as silent.
    pub silence_threshold: f32,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            flush_threshold_bytes: 80 * 1024,
            max_buffer_bytes: 1024 * 1024,
            silence_threshold: crate::audio::silence::SILENCE_AMPLITUDE_THRESHOLD,
        }
    }
}

/// A run of complete MP3 frames cut out of the stream, ready for playback.
/// Ownership transfers to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub bytes: Vec<u8>,
}

impl AudioSegment {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Reassembles base64 MP3 chunks into playable segments.
///
/// The network read loop appends chunks while a playback poller may flush
/// concurrently, so every read-modify-write sequence on the buffer runs under
/// one mutex. None of the operations suspend; work is bounded by the buffered
/// byte count, not the network.
pub struct AudioFrameAssembler {
    buffer: Mutex<Vec<u8>>,
    config: AssemblerConfig,
    detector: Box<dyn SilenceDetector>,
}

impl AudioFrameAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        let detector = PcmSilenceDetector::new(config.silence_threshold);
        Self::with_detector(config, Box::new(detector))
    }

    /// Build with a custom silence detector (tests, alternative decoders).
    pub fn with_detector(config: AssemblerConfig, detector: Box<dyn SilenceDetector>) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            config,
            detector,
        }
    }

    /// Decode a base64 audio chunk and append it to the buffer. Extraction
    /// only runs once the buffered size exceeds the flush threshold; below it
    /// this returns `Ok(None)` without scanning.
    pub fn add_chunk(&self, base64_payload: &str) -> Result<Option<AudioSegment>, DecodeError> {
        let decoded = BASE64.decode(base64_payload.trim())?;

        let mut buffer = self.buffer.lock().unwrap();
        buffer.extend_from_slice(&decoded);

        if buffer.len() > self.config.max_buffer_bytes {
            warn!(
                buffered = buffer.len(),
                "audio buffer exceeded hard cap, forcing a cut"
            );
            Ok(self.extract(&mut buffer, true))
        } else if buffer.len() > self.config.flush_threshold_bytes {
            Ok(self.extract(&mut buffer, false))
        } else {
            Ok(None)
        }
    }

    /// End-of-stream extraction. With `force` set, cuts at the last complete
    /// frame even when no frame was judged silent.
    pub fn flush(&self, force: bool) -> Option<AudioSegment> {
        let mut buffer = self.buffer.lock().unwrap();
        self.extract(&mut buffer, force)
    }

    /// Drop all buffered bytes (cancellation path).
    pub fn reset(&self) {
        self.buffer.lock().unwrap().clear();
    }

    /// Current buffered size in bytes.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    /// Scan the buffer and cut a segment out of it.
    ///
    /// Walks complete frames from the first sync word, remembering the end of
    /// the last silent one. A cut happens at that silent boundary, or at the
    /// end of the walk when forced. On a cut the emitted bytes and any
    /// leading garbage before the first sync word both leave the buffer; a
    /// failed scan leaves the buffer untouched, since it may still be
    /// accumulating a header that started mid-chunk.
    fn extract(&self, buffer: &mut Vec<u8>, force: bool) -> Option<AudioSegment> {
        let start = (0..buffer.len()).find(|&i| is_frame_sync(buffer, i))?;

        let mut offset = start;
        let mut silent_end: Option<usize> = None;

        while offset < buffer.len() {
            if !is_frame_sync(buffer, offset) {
                break;
            }
            let Some(frame_len) = frame_length_at(buffer, offset) else {
                // Unsupported or corrupt header: silence-eligible scanning
                // does not extend past it
                break;
            };
            if offset + frame_len > buffer.len() {
                // Incomplete trailing frame, keep for the next chunk
                break;
            }

            // Classify over a two-frame window to avoid decoder artifacts at
            // the frame boundary
            let window_end = (offset + frame_len * 2).min(buffer.len());
            if self.detector.is_silent(&buffer[offset..window_end]) {
                silent_end = Some(offset + frame_len);
            }

            offset += frame_len;
        }

        let cut = match silent_end {
            Some(end) => end,
            None if force && offset > start => offset,
            None => return None,
        };

        let bytes = buffer[start..cut].to_vec();
        buffer.drain(..cut);

        debug!(
            segment_bytes = bytes.len(),
            remaining = buffer.len(),
            silent_cut = silent_end.is_some(),
            "extracted audio segment"
        );

        Some(AudioSegment { bytes })
    }
}
