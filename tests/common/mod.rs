//! Shared test utilities

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parlance::audio::SAMPLE_RATE;

/// Generate sine wave audio samples
#[allow(
    dead_code,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(
    dead_code,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// Build a raw inference-event frame the way the server sends them
#[allow(dead_code)]
pub fn event_frame(
    transcript: &str,
    response: &str,
    segment_index: i64,
    is_last_segment: bool,
    audio: Option<&[u8]>,
) -> String {
    serde_json::json!({
        "transcript": transcript,
        "response": {
            "response": response,
            "links": [],
            "media_links": [],
            "personal_info": [],
        },
        "segment_index": segment_index,
        "is_last_segment": is_last_segment,
        "audio_segment": audio.map(|bytes| BASE64.encode(bytes)),
    })
    .to_string()
}
