pub mod assembler;
pub mod frame;
pub mod silence;

pub use assembler::{AssemblerConfig, AudioFrameAssembler, AudioSegment};
pub use frame::{frame_length_at, is_frame_sync, FrameHeader, MpegVersion};
pub use silence::{PcmSilenceDetector, SilenceDetector, SILENCE_AMPLITUDE_THRESHOLD};
