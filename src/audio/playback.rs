//! Strictly ordered playback of synthesized speech segments

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use crate::{Error, Result};

/// One playable chunk of synthesized speech (WAV bytes)
///
/// Ownership transfers into the queue on enqueue and into the sink on
/// playback.
#[derive(Debug)]
pub struct AudioSegment(pub Vec<u8>);

/// Notification from an audio sink back to the event loop
#[derive(Debug)]
pub enum PlaybackNotice {
    /// The segment with this generation finished playing
    Done {
        /// Generation assigned when playback began
        generation: u64,
    },
    /// Decode or playback of this generation failed
    Failed {
        /// Generation assigned when playback began
        generation: u64,
        /// Failure detail (logged, not shown raw)
        message: String,
    },
}

/// Something that can play one segment at a time
///
/// `begin` starts playback of a segment and must later produce exactly one
/// [`PlaybackNotice`] for that generation; `halt` interrupts the current
/// segment (its notice may still arrive and is ignored by generation).
pub trait AudioSink {
    /// Start playing a segment under the given generation number
    ///
    /// # Errors
    ///
    /// Returns error if playback cannot even be started.
    fn begin(&mut self, generation: u64, segment: AudioSegment) -> Result<()>;

    /// Interrupt whatever is currently playing
    fn halt(&mut self);
}

/// FIFO queue guaranteeing sequential, non-overlapping playback
///
/// Generation numbers make completions from halted segments harmless:
/// `stop` bumps the generation, so a late notice for a discarded segment
/// no longer matches.
pub struct PlaybackQueue<S> {
    queue: VecDeque<AudioSegment>,
    playing: bool,
    generation: u64,
    sink: S,
}

impl<S: AudioSink> PlaybackQueue<S> {
    /// Create an idle queue over the given sink
    pub fn new(sink: S) -> Self {
        Self {
            queue: VecDeque::new(),
            playing: false,
            generation: 0,
            sink,
        }
    }

    /// Append a segment; starts playback immediately when idle
    ///
    /// # Errors
    ///
    /// Returns error if the sink cannot start; the queue is cleared so no
    /// out-of-context audio from this turn plays later.
    pub fn enqueue(&mut self, segment: AudioSegment) -> Result<()> {
        self.queue.push_back(segment);
        if self.playing {
            return Ok(());
        }
        self.play_next()
    }

    /// Handle a completion notice for `generation`
    ///
    /// Stale generations (from halted or superseded segments) are ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the next segment cannot start.
    pub fn on_complete(&mut self, generation: u64) -> Result<()> {
        if !self.playing || generation != self.generation {
            tracing::trace!(generation, current = self.generation, "stale playback notice");
            return Ok(());
        }
        self.playing = false;
        self.play_next()
    }

    /// Handle a failure notice for `generation`
    ///
    /// A failing segment is non-fatal to the queue itself, but the rest of
    /// the turn's audio is dropped to avoid playing out-of-context speech.
    /// Returns true when the failure belonged to the current segment.
    pub fn on_failure(&mut self, generation: u64) -> bool {
        if !self.playing || generation != self.generation {
            return false;
        }
        self.playing = false;
        self.queue.clear();
        true
    }

    /// Halt current playback, discard all queued segments, and go idle
    ///
    /// No-op when already idle.
    pub fn stop(&mut self) {
        if self.playing {
            self.sink.halt();
            self.generation += 1;
            self.playing = false;
        }
        self.queue.clear();
    }

    /// Whether nothing is playing and nothing is queued
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.playing && self.queue.is_empty()
    }

    /// Whether a segment is currently playing
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Number of queued (not yet playing) segments
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue of pending segments is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn play_next(&mut self) -> Result<()> {
        let Some(segment) = self.queue.pop_front() else {
            return Ok(());
        };
        self.generation += 1;
        self.playing = true;
        if let Err(e) = self.sink.begin(self.generation, segment) {
            self.playing = false;
            self.queue.clear();
            return Err(e);
        }
        Ok(())
    }
}

/// Real audio sink: decodes WAV and plays through the default output device
///
/// Playback runs on a dedicated thread per segment (cpal streams are not
/// Send); completion and failure are posted back through the notice
/// channel. `halt` flips a cancel flag observed by the playing thread.
pub struct CpalSink {
    notices: tokio::sync::mpsc::UnboundedSender<PlaybackNotice>,
    cancel: Arc<AtomicBool>,
}

impl CpalSink {
    /// Create a sink that reports through `notices`
    pub fn new(notices: tokio::sync::mpsc::UnboundedSender<PlaybackNotice>) -> Self {
        Self {
            notices,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl AudioSink for CpalSink {
    fn begin(&mut self, generation: u64, segment: AudioSegment) -> Result<()> {
        // Fresh flag per segment so a halt cannot leak into the next one.
        self.cancel = Arc::new(AtomicBool::new(false));
        let cancel = Arc::clone(&self.cancel);
        let notices = self.notices.clone();

        std::thread::Builder::new()
            .name("parlance-playback".to_string())
            .spawn(move || {
                let notice = match play_wav_blocking(&segment.0, &cancel) {
                    Ok(()) => PlaybackNotice::Done { generation },
                    Err(e) => {
                        tracing::error!(error = %e, generation, "segment playback failed");
                        PlaybackNotice::Failed {
                            generation,
                            message: e.to_string(),
                        }
                    }
                };
                let _ = notices.send(notice);
            })
            .map_err(|e| Error::Playback(format!("spawn playback thread: {e}")))?;

        Ok(())
    }

    fn halt(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

/// Decode a WAV blob into mono f32 samples plus its sample rate
fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::Playback(format!("WAV decode: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let raw: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = f32::from(i16::MAX);
            reader
                .samples::<i16>()
                .map(|s| s.map(|v| f32::from(v) / max))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Playback(format!("WAV samples: {e}")))?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Playback(format!("WAV samples: {e}")))?,
    };

    let samples = if channels == 1 {
        raw
    } else {
        #[allow(clippy::cast_precision_loss)]
        raw.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok((samples, spec.sample_rate))
}

/// Play decoded samples to completion or cancellation
fn play_wav_blocking(bytes: &[u8], cancel: &Arc<AtomicBool>) -> Result<()> {
    let (samples, sample_rate) = decode_wav(bytes)?;
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: stereo output at the same rate
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Playback("no suitable output config found".to_string()))?;

    let config = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = config.channels as usize;

    let total = samples.len();
    let shared = Arc::new(Mutex::new(samples));
    let position = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(AtomicBool::new(false));

    let cb_samples = Arc::clone(&shared);
    let cb_position = Arc::clone(&position);
    let cb_finished = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let samples = cb_samples.lock().unwrap();
                let mut pos = cb_position.lock().unwrap();

                for frame in data.chunks_mut(channels) {
                    let sample = if *pos < samples.len() {
                        samples[*pos]
                    } else {
                        cb_finished.store(true, Ordering::Relaxed);
                        0.0
                    };

                    for out in frame.iter_mut() {
                        *out = sample;
                    }

                    if *pos < samples.len() {
                        *pos += 1;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;

    let duration_ms = (total as u64 * 1000) / u64::from(sample_rate);
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Relaxed) && !cancel.load(Ordering::Relaxed) {
        if std::time::Instant::now() > deadline {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    drop(stream);
    tracing::debug!(
        samples = total,
        cancelled = cancel.load(Ordering::Relaxed),
        "segment playback ended"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that records begin/halt calls without touching hardware
    #[derive(Default)]
    struct RecordingSink {
        begun: Vec<u64>,
        halted: usize,
        fail_next: bool,
    }

    impl AudioSink for RecordingSink {
        fn begin(&mut self, generation: u64, _segment: AudioSegment) -> Result<()> {
            if self.fail_next {
                return Err(Error::Playback("sink refused".to_string()));
            }
            self.begun.push(generation);
            Ok(())
        }

        fn halt(&mut self) {
            self.halted += 1;
        }
    }

    fn segment() -> AudioSegment {
        AudioSegment(vec![1, 2, 3])
    }

    #[test]
    fn enqueue_starts_immediately_when_idle() {
        let mut queue = PlaybackQueue::new(RecordingSink::default());
        queue.enqueue(segment()).unwrap();
        assert!(queue.is_playing());
        assert_eq!(queue.sink.begun.len(), 1);
    }

    #[test]
    fn segments_play_in_fifo_order_without_overlap() {
        let mut queue = PlaybackQueue::new(RecordingSink::default());
        queue.enqueue(segment()).unwrap();
        queue.enqueue(segment()).unwrap();
        queue.enqueue(segment()).unwrap();

        // Only the first started; the rest wait for completions.
        assert_eq!(queue.sink.begun.len(), 1);

        let first = *queue.sink.begun.last().unwrap();
        queue.on_complete(first).unwrap();
        assert_eq!(queue.sink.begun.len(), 2);

        let second = *queue.sink.begun.last().unwrap();
        queue.on_complete(second).unwrap();
        assert_eq!(queue.sink.begun.len(), 3);

        let third = *queue.sink.begun.last().unwrap();
        queue.on_complete(third).unwrap();
        assert!(queue.is_idle());

        // Generations are strictly increasing -> FIFO order preserved.
        assert!(queue.sink.begun.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn stop_halts_and_discards_everything() {
        let mut queue = PlaybackQueue::new(RecordingSink::default());
        queue.enqueue(segment()).unwrap();
        queue.enqueue(segment()).unwrap();

        queue.stop();
        assert!(queue.is_idle());
        assert_eq!(queue.sink.halted, 1);

        // Late notice from the halted segment is ignored.
        queue.on_complete(1).unwrap();
        assert!(queue.is_idle());
        assert_eq!(queue.sink.begun.len(), 1);
    }

    #[test]
    fn stop_on_idle_queue_is_a_noop() {
        let mut queue = PlaybackQueue::new(RecordingSink::default());
        queue.stop();
        queue.stop();
        assert!(queue.is_idle());
        assert_eq!(queue.sink.halted, 0);
    }

    #[test]
    fn failure_drops_the_rest_of_the_turn() {
        let mut queue = PlaybackQueue::new(RecordingSink::default());
        queue.enqueue(segment()).unwrap();
        queue.enqueue(segment()).unwrap();
        queue.enqueue(segment()).unwrap();

        let current = *queue.sink.begun.last().unwrap();
        assert!(queue.on_failure(current));
        assert!(queue.is_idle());
        assert_eq!(queue.sink.begun.len(), 1);
    }

    #[test]
    fn stale_failure_is_ignored() {
        let mut queue = PlaybackQueue::new(RecordingSink::default());
        queue.enqueue(segment()).unwrap();
        assert!(!queue.on_failure(999));
        assert!(queue.is_playing());
    }

    #[test]
    fn begin_error_clears_queue() {
        let mut queue = PlaybackQueue::new(RecordingSink {
            fail_next: true,
            ..RecordingSink::default()
        });
        queue.enqueue(segment()).unwrap_err();
        assert!(queue.is_idle());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_wav(&[0u8; 16]).is_err());
    }

    #[test]
    fn decode_handles_pcm16_mono() {
        let samples = vec![0.25f32; 240];
        let wav = crate::audio::samples_to_wav(&samples, 24000).unwrap();
        let (decoded, rate) = decode_wav(&wav).unwrap();
        assert_eq!(rate, 24000);
        assert_eq!(decoded.len(), 240);
        assert!((decoded[0] - 0.25).abs() < 0.01);
    }
}
