//! Error types for the voice interaction engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice interaction engine
///
/// All variants are recoverable at the UI level; none are fatal to the
/// process. [`Error::user_message`] maps each kind to a single
/// human-readable string.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The host runtime has no audio capture capability at all
    #[error("audio capture unsupported on this host")]
    CaptureUnsupported,

    /// No audio input device is enumerable
    #[error("no microphone detected")]
    NoMicrophone,

    /// Microphone permission is denied; carries platform remediation text
    #[error("microphone permission denied: {remediation}")]
    PermissionDenied {
        /// Platform-specific instructions for granting access
        remediation: String,
    },

    /// The input device exists but cannot be opened (held by another app)
    #[error("microphone busy or unreadable")]
    DeviceBusy,

    /// Capture failed for a reason we cannot classify
    #[error("capture error: {0}")]
    UnknownCapture(String),

    /// An operation required an open streaming connection
    #[error("streaming connection is not open")]
    NotConnected,

    /// The streaming connection closed
    #[error("streaming connection closed")]
    TransportClosed,

    /// The streaming connection failed
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound stream message could not be parsed or validated
    #[error("malformed stream event: {0}")]
    MalformedEvent(String),

    /// The one-shot text query failed
    #[error("text query failed with status {status}: {body}")]
    QueryFailed {
        /// HTTP status code (0 when the request never completed)
        status: u16,
        /// Response body text
        body: String,
    },

    /// Audio decode or playback failure
    #[error("playback error: {0}")]
    Playback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket protocol error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Single user-facing message per error kind
    ///
    /// Raw transport errors are never shown unfiltered; permission errors
    /// carry platform-specific remediation.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::CaptureUnsupported => {
                "Your system does not support audio recording.".to_string()
            }
            Self::NoMicrophone => {
                "No microphone detected. Please connect a microphone and try again.".to_string()
            }
            Self::PermissionDenied { remediation } => {
                format!("Microphone access is denied. {remediation}")
            }
            Self::DeviceBusy => {
                "Microphone is in use by another application or not accessible. \
                 Please close other apps using the microphone and try again."
                    .to_string()
            }
            Self::UnknownCapture(_) => {
                "Unable to access microphone. An unexpected error occurred. Please ensure \
                 a microphone is connected, permissions are granted, and try again."
                    .to_string()
            }
            Self::NotConnected => {
                "Connection to the server is not open. Please try again.".to_string()
            }
            Self::TransportClosed => {
                "Connection to the server was lost. Please restart the session.".to_string()
            }
            Self::Transport(_) | Self::WebSocket(_) => {
                "Error connecting to server. Please try again.".to_string()
            }
            Self::MalformedEvent(_) => {
                "Error processing server response. Please try again.".to_string()
            }
            Self::QueryFailed { status, .. } => {
                format!("Failed to process text query (status {status}). Please try again.")
            }
            Self::Playback(_) => {
                "Error playing assistant response. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Platform-specific instructions for granting microphone access
#[must_use]
pub fn permission_instructions() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "Please enable microphone access in System Settings > Privacy & Security > \
         Microphone, then restart the application."
    }
    #[cfg(target_os = "windows")]
    {
        "Please enable microphone access in Settings > Privacy & security > \
         Microphone, then restart the application."
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        "Please check that your audio server (PipeWire or PulseAudio) is running and \
         that your user has access to the input device, then restart the application."
    }
}
