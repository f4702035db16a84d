//! Audio capture-side processing
//!
//! Turns per-speaker voice frames into silence-bounded utterances and
//! encodes them for transcription.

mod segmenter;
mod wav;

pub use segmenter::{AudioSegmenter, SegmenterConfig, SegmenterOutput, Utterance};
pub use wav::pcm_to_wav;

/// Sample rate of decoded platform voice frames
pub const INPUT_SAMPLE_RATE: u32 = 48_000;

/// Sample rate after the optional downsample for STT upload
pub const STT_SAMPLE_RATE: u32 = 16_000;
