use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::DecodeError;

/// Amplitude below which a decoded sample counts as silent, on a [-1, 1]
/// scale. TTS output pads sentence boundaries with true digital silence, so
/// the threshold only needs to absorb decoder rounding.
pub const SILENCE_AMPLITUDE_THRESHOLD: f32 = 1e-4;

/// Classifies a span of MP3 frame bytes as silent or not.
///
/// The span covers one or two consecutive frames; callers pass two whenever
/// possible to avoid decoder artifacts at frame boundaries. Implementations
/// must contain decode failures: a frame that cannot be decoded is reported
/// as not silent, never as an error that could kill the pipeline.
pub trait SilenceDetector: Send + Sync {
    fn is_silent(&self, span: &[u8]) -> bool;
}

/// Silence detection by decoding the span to PCM.
#[derive(Debug, Clone)]
pub struct PcmSilenceDetector {
    threshold: f32,
}

impl PcmSilenceDetector {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Decode `span` and report whether every sample stays below the
    /// threshold. Errors out on malformed frame data.
    fn decode_is_silent(&self, span: &[u8]) -> Result<bool, DecodeError> {
        let cursor = Cursor::new(span.to_vec());
        let stream = MediaSourceStream::new(Box::new(cursor), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("mp3");

        let probed = symphonia::default::get_probe().format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut reader = probed.format;

        let track = reader.default_track().ok_or(DecodeError::NoTrack)?;
        let track_id = track.id;
        let mut decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        loop {
            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                // End of the span
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = decoder.decode(&packet)?;
            let spec = *decoded.spec();
            let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            samples.copy_interleaved_ref(decoded);

            for &sample in samples.samples() {
                if sample.abs() > self.threshold {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}

impl Default for PcmSilenceDetector {
    fn default() -> Self {
        Self::new(SILENCE_AMPLITUDE_THRESHOLD)
    }
}

impl SilenceDetector for PcmSilenceDetector {
    fn is_silent(&self, span: &[u8]) -> bool {
        match self.decode_is_silent(span) {
            Ok(silent) => silent,
            Err(e) => {
                // Malformed frame data: ineligible for a silence cut
                debug!("frame decode failed, treating as non-silent: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes_are_not_silent() {
        let detector = PcmSilenceDetector::default();
        assert!(!detector.is_silent(&[0x12, 0x34, 0x56, 0x78, 0x9A]));
    }

    #[test]
    fn test_valid_header_with_garbage_payload_is_not_silent() {
        // A plausible MPEG-1 Layer III header followed by noise that will not
        // decode cleanly must degrade to "not silent", not panic.
        let mut span = vec![0xFF, 0xFB, 0x90, 0x00];
        span.extend(std::iter::repeat(0xA5).take(413));
        let detector = PcmSilenceDetector::default();
        assert!(!detector.is_silent(&span));
    }

    #[test]
    fn test_empty_span_is_not_silent() {
        let detector = PcmSilenceDetector::default();
        assert!(!detector.is_silent(&[]));
    }
}
