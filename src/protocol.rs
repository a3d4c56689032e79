//! Wire types for the streaming channel and the text query call

use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sentinel segment index marking a final aggregate event with no further audio
pub const FINAL_AGGREGATE_INDEX: i64 = -1;

/// One finished user turn of recorded audio
///
/// Owned exclusively by the capture session until handed to the stream
/// client; consumed on send.
#[derive(Debug)]
pub struct Utterance {
    /// Encoded audio bytes (WAV container)
    pub audio: Vec<u8>,
    /// Encoding mime type, e.g. `audio/wav`
    pub mime_type: &'static str,
    /// When recording started
    pub started_at: Instant,
}

impl Utterance {
    /// Encode the audio as the single base64 text payload the server expects
    #[must_use]
    pub fn to_wire(&self) -> String {
        BASE64.encode(&self.audio)
    }
}

/// Structured assistant answer
///
/// The default all-empty value is the safe value to render before any
/// answer arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// Answer text
    #[serde(default)]
    pub response: String,
    /// External profile links
    #[serde(default)]
    pub links: Vec<Link>,
    /// Media URLs (images/videos)
    #[serde(default)]
    pub media_links: Vec<String>,
    /// Contact details
    #[serde(default)]
    pub personal_info: Vec<PersonalInfo>,
}

/// One external link in a response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Platform name, e.g. "GitHub"
    pub platform: String,
    /// Target URL
    pub url: String,
}

/// One contact detail in a response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalInfo {
    /// Kind of detail, e.g. "Email", "Phone"
    #[serde(rename = "type")]
    pub kind: String,
    /// The detail itself
    pub value: String,
}

/// One incremental inference update from the server
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEvent {
    /// Recognized text of the user's utterance
    #[serde(default)]
    pub transcript: String,
    /// Assistant answer as known so far
    pub response: ResponsePayload,
    /// Position of this audio segment within the turn
    pub segment_index: i64,
    /// Whether this is the terminal event for the turn
    pub is_last_segment: bool,
    /// Base64-encoded synthesized speech segment, if any
    #[serde(default)]
    pub audio_segment: Option<String>,
}

impl StreamEvent {
    /// Parse and validate one inbound text frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedEvent`] when the frame is not valid JSON,
    /// misses required fields, or carries contradictory terminal signals
    /// (`segment_index == -1` without `is_last_segment`).
    pub fn parse(raw: &str) -> Result<Self> {
        let event: Self = serde_json::from_str(raw)
            .map_err(|e| Error::MalformedEvent(format!("invalid JSON: {e}")))?;

        if event.segment_index == FINAL_AGGREGATE_INDEX && !event.is_last_segment {
            return Err(Error::MalformedEvent(
                "segment_index -1 on a non-terminal event".to_string(),
            ));
        }
        if event.segment_index < FINAL_AGGREGATE_INDEX {
            return Err(Error::MalformedEvent(format!(
                "segment_index {} out of range",
                event.segment_index
            )));
        }

        Ok(event)
    }

    /// Decode the attached audio segment, if present and non-empty
    ///
    /// Audio attached to a terminal event is a repeat of the combined turn
    /// audio and is never played, so it decodes to `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedEvent`] on invalid base64.
    pub fn decode_audio(&self) -> Result<Option<Vec<u8>>> {
        if self.is_last_segment {
            return Ok(None);
        }
        match self.audio_segment.as_deref() {
            None | Some("") => Ok(None),
            Some(encoded) => BASE64
                .decode(encoded)
                .map(Some)
                .map_err(|e| Error::MalformedEvent(format!("invalid audio base64: {e}"))),
        }
    }
}

/// Request body for the one-shot text query call
#[derive(Debug, Serialize)]
pub struct TextQuery<'a> {
    /// The user's question
    pub query: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_event() {
        let raw = r#"{
            "transcript": "what projects have you built?",
            "response": {"response": "Several.", "links": [], "media_links": [], "personal_info": []},
            "segment_index": 0,
            "is_last_segment": false,
            "audio_segment": "UklGRg=="
        }"#;
        let event = StreamEvent::parse(raw).unwrap();
        assert_eq!(event.segment_index, 0);
        assert!(!event.is_last_segment);
        assert!(event.decode_audio().unwrap().is_some());
    }

    #[test]
    fn terminal_audio_is_never_played() {
        let raw = r#"{
            "transcript": "q",
            "response": {"response": "a"},
            "segment_index": 3,
            "is_last_segment": true,
            "audio_segment": "UklGRg=="
        }"#;
        let event = StreamEvent::parse(raw).unwrap();
        assert!(event.decode_audio().unwrap().is_none());
    }

    #[test]
    fn final_aggregate_requires_terminal_flag() {
        let raw = r#"{
            "transcript": "",
            "response": {"response": ""},
            "segment_index": -1,
            "is_last_segment": false
        }"#;
        assert!(matches!(
            StreamEvent::parse(raw),
            Err(Error::MalformedEvent(_))
        ));
    }

    #[test]
    fn missing_required_fields_is_malformed() {
        assert!(matches!(
            StreamEvent::parse(r#"{"transcript": "hi"}"#),
            Err(Error::MalformedEvent(_))
        ));
        assert!(matches!(
            StreamEvent::parse("not json"),
            Err(Error::MalformedEvent(_))
        ));
    }

    #[test]
    fn response_payload_defaults_are_empty() {
        let payload = ResponsePayload::default();
        assert!(payload.response.is_empty());
        assert!(payload.links.is_empty());
        assert!(payload.media_links.is_empty());
        assert!(payload.personal_info.is_empty());
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        // The server includes extra fields like repo_name; those are not an error.
        let raw = r#"{
            "transcript": "q",
            "response": {"response": "a"},
            "segment_index": 0,
            "is_last_segment": false,
            "repo_name": "demo"
        }"#;
        assert!(StreamEvent::parse(raw).is_ok());
    }
}
