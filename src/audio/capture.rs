//! Microphone capture for one utterance at a time

use std::sync::{Arc, Mutex};
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use crate::audio::silence::{EndOfUtterance, SilenceDetector};
use crate::config::AudioConfig;
use crate::error::permission_instructions;
use crate::protocol::Utterance;
use crate::{Error, Result};

/// Owns the microphone for the duration of one recording
///
/// Acquires the device on [`CaptureSession::begin`], feeds energy frames to
/// the silence detector on [`CaptureSession::poll`], and releases the
/// device on every exit path.
pub struct CaptureSession {
    stream: Option<Stream>,
    buffer: Arc<Mutex<Vec<f32>>>,
    cursor: usize,
    detector: SilenceDetector,
    sample_rate: u32,
    started_at: Instant,
}

impl CaptureSession {
    /// Check capture preconditions and acquire the microphone
    ///
    /// Preconditions are checked in order: host capture support, at least
    /// one enumerable input device, and permission state. Acquisition
    /// failures are classified into the capture error taxonomy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureUnsupported`], [`Error::NoMicrophone`],
    /// [`Error::PermissionDenied`], [`Error::DeviceBusy`], or
    /// [`Error::UnknownCapture`].
    pub fn begin(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = preflight(&host)?;

        let stream_config = select_config(&device, config.sample_rate)?;
        let channels = stream_config.channels as usize;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = stream_config.sample_rate.0,
            channels = stream_config.channels,
            "capture session acquiring microphone"
        );

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let callback_buffer = Arc::clone(&buffer);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = callback_buffer.lock() {
                        if channels == 1 {
                            buf.extend_from_slice(data);
                        } else {
                            // Downmix interleaved frames to mono.
                            #[allow(clippy::cast_precision_loss)]
                            buf.extend(data.chunks(channels).map(|frame| {
                                frame.iter().sum::<f32>() / frame.len() as f32
                            }));
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(classify_build_error)?;

        stream.play().map_err(|e| classify_acquire("play", &e.to_string()))?;

        let now = Instant::now();
        let mut detector = SilenceDetector::new(
            config.activity_threshold,
            config.silence_timeout,
            config.max_utterance,
        );
        detector.start(now);

        tracing::debug!("capture started");
        Ok(Self {
            stream: Some(stream),
            buffer,
            cursor: 0,
            detector,
            sample_rate: stream_config.sample_rate.0,
            started_at: now,
        })
    }

    /// Feed newly captured audio to the silence detector
    ///
    /// Called periodically by the event loop. Returns the end-of-utterance
    /// signal at most once per recording.
    pub fn poll(&mut self, now: Instant) -> Option<EndOfUtterance> {
        let frame = {
            let buf = self.buffer.lock().ok()?;
            let frame: Vec<u8> = buf[self.cursor.min(buf.len())..]
                .iter()
                .map(|&s| energy_byte(s))
                .collect();
            self.cursor = buf.len();
            frame
        };
        self.detector.observe(&frame, now)
    }

    /// Whether the device stream is still held
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.stream.is_some()
    }

    /// Mean energy of the most recent second of audio (diagnostics)
    #[must_use]
    pub fn recent_energy(&self) -> u8 {
        let Ok(buf) = self.buffer.lock() else {
            return 0;
        };
        let window = self.sample_rate as usize;
        let start = buf.len().saturating_sub(window);
        let frame: Vec<u8> = buf[start..].iter().map(|&s| energy_byte(s)).collect();
        crate::audio::mean_energy(&frame)
    }

    /// When this recording started
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Stop recording and finalize the buffered audio into one utterance
    ///
    /// Returns `None` when recording stopped before any audio was
    /// captured. Idempotent; the device is released either way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCapture`] if WAV encoding fails. The device
    /// is still released on that path.
    pub fn finish(&mut self) -> Result<Option<Utterance>> {
        self.release();

        let samples = self
            .buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        if samples.is_empty() {
            tracing::debug!("capture finished with no audio");
            return Ok(None);
        }

        let audio = samples_to_wav(&samples, self.sample_rate)?;
        tracing::debug!(
            samples = samples.len(),
            bytes = audio.len(),
            "capture finalized"
        );
        Ok(Some(Utterance {
            audio,
            mime_type: "audio/wav",
            started_at: self.started_at,
        }))
    }

    /// Release the device and discard buffered audio without producing an
    /// utterance. Idempotent.
    pub fn abort(&mut self) {
        self.release();
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
        self.cursor = 0;
    }

    fn release(&mut self) {
        self.detector.reset();
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("microphone released");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Check host capability, device presence, and permission state
fn preflight(host: &cpal::Host) -> Result<Device> {
    let mut devices = host.input_devices().map_err(|e| {
        tracing::warn!(error = %e, "input device enumeration failed");
        Error::CaptureUnsupported
    })?;
    if devices.next().is_none() {
        return Err(Error::NoMicrophone);
    }

    let device = host.default_input_device().ok_or(Error::NoMicrophone)?;

    // The closest thing to a permission-state query the audio backends
    // give us: asking for the default config fails up front when access
    // is denied.
    if let Err(e) = device.default_input_config() {
        return Err(classify_acquire("default_input_config", &e.to_string()));
    }

    Ok(device)
}

/// Pick a mono config at the requested rate, falling back to the device default
fn select_config(device: &Device, sample_rate: u32) -> Result<StreamConfig> {
    let preferred = device
        .supported_input_configs()
        .ok()
        .and_then(|mut configs| {
            configs.find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .map(|c| c.with_sample_rate(SampleRate(sample_rate)).config());

    match preferred {
        Some(config) => Ok(config),
        None => device
            .default_input_config()
            .map(|c| c.config())
            .map_err(|e| classify_acquire("default_input_config", &e.to_string())),
    }
}

fn classify_build_error(err: cpal::BuildStreamError) -> Error {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => Error::DeviceBusy,
        other => classify_acquire("build_input_stream", &other.to_string()),
    }
}

/// Map backend error text onto the capture error taxonomy
fn classify_acquire(stage: &str, message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        Error::PermissionDenied {
            remediation: permission_instructions().to_string(),
        }
    } else if lower.contains("busy") || lower.contains("in use") || lower.contains("unavailable") {
        Error::DeviceBusy
    } else if lower.contains("no device") || lower.contains("not found") {
        Error::NoMicrophone
    } else {
        Error::UnknownCapture(format!("{stage}: {message}"))
    }
}

/// Map one f32 sample onto the 0-255 energy scale
fn energy_byte(sample: f32) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        (sample.abs() * 255.0).clamp(0.0, 255.0) as u8
    }
}

/// Encode f32 samples as a 16-bit PCM WAV blob
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::UnknownCapture(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::UnknownCapture(e.to_string()))?;
        }

        writer
            .finalize()
            .map_err(|e| Error::UnknownCapture(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_permission_errors() {
        assert!(matches!(
            classify_acquire("open", "Operation not permitted: permission denied"),
            Error::PermissionDenied { .. }
        ));
    }

    #[test]
    fn classifies_busy_devices() {
        assert!(matches!(
            classify_acquire("open", "device busy"),
            Error::DeviceBusy
        ));
        assert!(matches!(
            classify_build_error(cpal::BuildStreamError::DeviceNotAvailable),
            Error::DeviceBusy
        ));
    }

    #[test]
    fn unclassified_errors_keep_their_stage() {
        match classify_acquire("build_input_stream", "weird ALSA failure") {
            Error::UnknownCapture(msg) => assert!(msg.contains("build_input_stream")),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn energy_byte_scales_and_clamps() {
        assert_eq!(energy_byte(0.0), 0);
        assert_eq!(energy_byte(1.0), 255);
        assert_eq!(energy_byte(-1.0), 255);
        assert_eq!(energy_byte(2.0), 255);
        assert!(energy_byte(0.02) < 10);
        assert!(energy_byte(0.2) > 10);
    }

    #[test]
    fn wav_encoding_round_trips_header() {
        let samples = vec![0.0f32; 1600];
        let wav = samples_to_wav(&samples, 16000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 1600);
    }
}
