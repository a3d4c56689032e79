//! Parlance - Real-time voice interaction engine
//!
//! This library provides the client side of a streaming voice assistant:
//! - Microphone capture with silence-based end-of-utterance detection
//! - Persistent streaming connection carrying utterances and responses
//! - Strictly ordered playback of incremental audio segments
//! - An interaction state machine orchestrating the whole exchange
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Inputs                           │
//! │    Microphone   │   Text queries   │   Playback     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Interaction Engine                     │
//! │   Capture  │  Silence  │  Controller  │  Playback   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                Backend (streaming)                   │
//! │   Transcription  │  Response  │  Audio segments     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod stream;

pub use app::App;
pub use audio::{
    AudioSegment, AudioSink, CaptureSession, CpalSink, EndOfUtterance, PlaybackNotice,
    PlaybackQueue, SilenceDetector,
};
pub use config::{AudioConfig, Config};
pub use controller::{Command, Input, InteractionController, InteractionState, Phase};
pub use error::{Error, Result};
pub use protocol::{Link, PersonalInfo, ResponsePayload, StreamEvent, Utterance};
pub use stream::{QueryClient, StreamClient, StreamSignal};
