//! Event-loop runtime wiring capture, the stream, and playback together
//!
//! Single-task cooperative loop: capture is polled on a 100ms tick, stream
//! signals and playback notices arrive over channels, and user input comes
//! from stdin lines. cpal streams are not Send, so the capture session
//! lives inside this loop and playback runs on its own threads.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use crate::audio::{AudioSegment, CaptureSession, CpalSink, PlaybackNotice, PlaybackQueue};
use crate::config::Config;
use crate::controller::{Command, Input, InteractionController, InteractionState, Phase};
use crate::stream::{QueryClient, StreamClient, StreamSignal};
use crate::{Error, Result};

/// Capture polling cadence
const TICK: Duration = Duration::from_millis(100);

/// Wraps the stream signal channel so transport loss is observed once
///
/// After the reader task drops its sender (or sends `Closed`), a raw
/// `recv()` would resolve immediately on every poll. This feed collapses
/// both endings into a single `Closed` and then pends forever, so the
/// select loop neither spins nor re-reports the loss.
struct StreamFeed {
    rx: mpsc::UnboundedReceiver<StreamSignal>,
    open: bool,
}

impl StreamFeed {
    fn new(rx: mpsc::UnboundedReceiver<StreamSignal>) -> Self {
        Self { rx, open: true }
    }

    async fn next(&mut self) -> StreamSignal {
        if !self.open {
            return std::future::pending().await;
        }
        match self.rx.recv().await {
            Some(StreamSignal::Closed) | None => {
                self.open = false;
                StreamSignal::Closed
            }
            Some(signal) => signal,
        }
    }
}

/// The running engine: one streaming connection, one microphone, one loop
pub struct App {
    config: Config,
    controller: InteractionController,
    stream: StreamClient,
    stream_feed: StreamFeed,
    query: QueryClient,
    playback: PlaybackQueue<CpalSink>,
    notices_rx: mpsc::UnboundedReceiver<PlaybackNotice>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs_rx: mpsc::UnboundedReceiver<Input>,
    capture: Option<CaptureSession>,
    rendered: Option<InteractionState>,
}

impl App {
    /// Connect to the backend and assemble the engine
    ///
    /// # Errors
    ///
    /// Returns error if the streaming connection cannot be established.
    pub async fn connect(config: Config) -> Result<Self> {
        let (stream, stream_rx) = StreamClient::connect(&config.server_url).await?;
        let query = QueryClient::new(config.query_url.clone());

        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let playback = PlaybackQueue::new(CpalSink::new(notices_tx));
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            controller: InteractionController::new(),
            stream,
            stream_feed: StreamFeed::new(stream_rx),
            query,
            playback,
            notices_rx,
            inputs_tx,
            inputs_rx,
            capture: None,
            rendered: None,
        })
    }

    /// Run until stdin closes or Ctrl-C
    ///
    /// Stdin protocol: an empty line toggles recording, any other line is
    /// a text query, `/retry` retries after an error, `/quit` exits.
    ///
    /// # Errors
    ///
    /// Returns error only on loop-fatal conditions; interaction errors
    /// surface through the state machine instead.
    #[allow(clippy::future_not_send)]
    pub async fn run(mut self) -> Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        let mut ticker = tokio::time::interval(TICK);

        println!("Ready. Press Enter to talk, type to ask, /quit to exit.");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted");
                    break;
                }

                line = lines.next_line() => {
                    let Ok(Some(line)) = line else { break };
                    match line.trim() {
                        "/quit" => break,
                        "/retry" => self.apply(Input::Retry).await,
                        "" => {
                            let input = if self.controller.state().phase == Phase::Listening {
                                Input::ManualStop
                            } else {
                                Input::StartCapture
                            };
                            self.apply(input).await;
                        }
                        text => self.apply(Input::SubmitQuery(text.to_string())).await,
                    }
                }

                _ = ticker.tick() => {
                    self.poll_capture().await;
                }

                signal = self.stream_feed.next() => {
                    self.on_stream_signal(signal).await;
                }

                notice = self.notices_rx.recv() => {
                    if let Some(notice) = notice {
                        self.on_playback_notice(notice).await;
                    }
                }

                input = self.inputs_rx.recv() => {
                    if let Some(input) = input {
                        self.apply(input).await;
                    }
                }
            }

            self.render();
        }

        if let Some(mut capture) = self.capture.take() {
            capture.abort();
        }
        self.playback.stop();
        self.stream.close().await;
        tracing::info!("engine stopped");
        Ok(())
    }

    /// Check the silence detector against newly captured audio
    async fn poll_capture(&mut self) {
        let Some(capture) = self.capture.as_mut() else {
            return;
        };
        if let Some(end) = capture.poll(Instant::now()) {
            tracing::info!(reason = ?end, "utterance ended");
            self.apply(Input::ManualStop).await;
        }
    }

    /// Translate one stream signal into a controller input
    async fn on_stream_signal(&mut self, signal: StreamSignal) {
        match signal {
            StreamSignal::Event(event) => {
                let elapsed = if event.is_last_segment {
                    self.stream.take_latency()
                } else {
                    None
                };
                self.apply(Input::Event { event, elapsed }).await;
            }
            StreamSignal::Malformed(detail) => {
                self.apply(Input::Malformed(
                    Error::MalformedEvent(detail).user_message(),
                ))
                .await;
            }
            StreamSignal::Closed => {
                self.stream.mark_closed();
                self.apply(Input::StreamClosed).await;
            }
        }
    }

    /// Advance the playback queue on a completion or failure notice
    async fn on_playback_notice(&mut self, notice: PlaybackNotice) {
        match notice {
            PlaybackNotice::Done { generation } => {
                if let Err(e) = self.playback.on_complete(generation) {
                    self.apply(Input::PlaybackFailed(e.user_message())).await;
                } else if self.playback.is_idle() {
                    self.apply(Input::PlaybackIdle).await;
                }
            }
            PlaybackNotice::Failed {
                generation,
                message,
            } => {
                if self.playback.on_failure(generation) {
                    self.apply(Input::PlaybackFailed(
                        Error::Playback(message).user_message(),
                    ))
                    .await;
                }
            }
        }
    }

    /// Apply one input and execute the resulting commands
    ///
    /// Commands can produce follow-up inputs (a capture failure, a
    /// finished utterance); those are drained here rather than recursing.
    async fn apply(&mut self, input: Input) {
        let mut pending = VecDeque::from([input]);

        while let Some(input) = pending.pop_front() {
            for command in self.controller.handle(input) {
                match command {
                    Command::StopPlayback => self.playback.stop(),

                    Command::BeginCapture => match CaptureSession::begin(&self.config.audio) {
                        Ok(session) => self.capture = Some(session),
                        Err(e) => {
                            tracing::warn!(error = %e, "capture failed to start");
                            pending.push_back(Input::CaptureFailed(e.user_message()));
                        }
                    },

                    Command::EndCapture => match self.capture.take() {
                        Some(mut session) => match session.finish() {
                            Ok(Some(utterance)) => {
                                pending.push_back(Input::UtteranceReady(utterance));
                            }
                            Ok(None) => pending.push_back(Input::CaptureDiscarded),
                            Err(e) => pending.push_back(Input::CaptureFailed(e.user_message())),
                        },
                        None => pending.push_back(Input::CaptureDiscarded),
                    },

                    Command::AbortCapture => {
                        if let Some(mut session) = self.capture.take() {
                            session.abort();
                        }
                    }

                    Command::SendUtterance(utterance) => {
                        if let Err(e) = self.stream.send_utterance(&utterance).await {
                            tracing::warn!(error = %e, "utterance send failed");
                            pending.push_back(Input::TransportFailed(e.user_message()));
                        }
                    }

                    Command::EnqueueAudio(audio) => {
                        let was_idle = self.playback.is_idle();
                        match self.playback.enqueue(AudioSegment(audio)) {
                            Ok(()) => {
                                if was_idle {
                                    pending.push_back(Input::PlaybackStarted);
                                }
                            }
                            Err(e) => {
                                pending.push_back(Input::PlaybackFailed(e.user_message()));
                            }
                        }
                    }

                    Command::SendQuery { text, turn } => {
                        let client = self.query.clone();
                        let inputs = self.inputs_tx.clone();
                        tokio::spawn(async move {
                            let started = Instant::now();
                            let input = match client.send(&text).await {
                                Ok(payload) => Input::QueryOk {
                                    payload,
                                    elapsed: started.elapsed(),
                                    turn,
                                },
                                Err(e) => {
                                    tracing::warn!(error = %e, "text query failed");
                                    Input::QueryFailed {
                                        message: e.user_message(),
                                        turn,
                                    }
                                }
                            };
                            let _ = inputs.send(input);
                        });
                    }

                    Command::ClearLatency => self.stream.clear_latency(),
                }
            }
        }
    }

    /// Print the parts of the state that changed since the last render
    fn render(&mut self) {
        let state = self.controller.state().clone();
        if self.rendered.as_ref() == Some(&state) {
            return;
        }

        match state.phase {
            Phase::Listening => println!("[listening] {}", state.transcript),
            Phase::AwaitingResponse => println!("[thinking] {}", state.transcript),
            Phase::Responding => {
                println!("[response] {}", state.response.response);
                for link in &state.response.links {
                    println!("  link: {} -> {}", link.platform, link.url);
                }
                if state.response.media_links.is_empty() {
                    println!("  No media available.");
                } else {
                    for media in &state.response.media_links {
                        println!("  media: {media}");
                    }
                }
                for info in &state.response.personal_info {
                    println!("  {}: {}", info.kind, info.value);
                }
                match state.latency_seconds() {
                    Some(s) => println!("  Response time: {s} seconds"),
                    None => println!("  Response time: Not available"),
                }
            }
            Phase::Error => {
                if let Some(error) = &state.error {
                    println!("[error] {error} (/retry to try again)");
                }
            }
            Phase::Idle => {}
        }

        self.rendered = Some(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A pending feed must not resolve within this window
    const QUIET: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn feed_reports_channel_drop_as_one_closed_then_pends() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut feed = StreamFeed::new(rx);
        drop(tx);

        assert!(matches!(feed.next().await, StreamSignal::Closed));

        // A raw recv() on the dropped channel would resolve immediately
        // forever; the feed must stay silent instead.
        let quiet = tokio::time::timeout(QUIET, feed.next()).await;
        assert!(quiet.is_err(), "feed resolved again after reporting close");
    }

    #[tokio::test]
    async fn feed_collapses_explicit_close_and_drop_into_one_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut feed = StreamFeed::new(rx);
        tx.send(StreamSignal::Malformed("bad frame".to_string())).unwrap();
        tx.send(StreamSignal::Closed).unwrap();
        drop(tx);

        assert!(matches!(feed.next().await, StreamSignal::Malformed(_)));
        assert!(matches!(feed.next().await, StreamSignal::Closed));

        let quiet = tokio::time::timeout(QUIET, feed.next()).await;
        assert!(quiet.is_err(), "feed resolved again after the close signal");
    }
}
