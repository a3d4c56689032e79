//! Audio capture, end-of-utterance detection, and ordered playback
//!
//! Speech recognition and synthesis stay on the server; this module only
//! moves audio in and out of the host devices.

mod capture;
mod playback;
mod silence;

pub use capture::{samples_to_wav, CaptureSession};
pub use playback::{AudioSegment, AudioSink, CpalSink, PlaybackNotice, PlaybackQueue};
pub use silence::{mean_energy, EndOfUtterance, SilenceDetector};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;
