//! Interaction state machine
//!
//! Owns all UI-visible state and every transition across capture, the
//! stream, and playback. Each transition is a pure function from (state,
//! input) to (new state, side-effect commands); the event loop in
//! [`crate::app`] executes the commands. Nothing here touches devices or
//! sockets, so the whole machine is testable in isolation.

use std::time::Duration;

use crate::protocol::{ResponsePayload, StreamEvent, Utterance, FINAL_AGGREGATE_INDEX};
use crate::Error;

/// Placeholder transcript shown while recording
const LISTENING_PLACEHOLDER: &str = "Listening...";

/// Interaction phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing in flight
    Idle,
    /// Microphone is recording
    Listening,
    /// An utterance or query was sent; events are arriving
    AwaitingResponse,
    /// Final response rendered; playback may still be draining
    Responding,
    /// A recoverable error is displayed
    Error,
}

/// UI-visible interaction state
///
/// Mutated only by [`InteractionController`]; presentation layers read it.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionState {
    /// Current phase
    pub phase: Phase,
    /// Recognized text of the current turn
    pub transcript: String,
    /// Assistant answer as known so far
    pub response: ResponsePayload,
    /// Whether `response` is the turn's final answer
    pub finalized: bool,
    /// User-facing error message, if any
    pub error: Option<String>,
    /// Measured response latency for the last completed turn
    pub latency: Option<Duration>,
    /// Whether synthesized speech is currently audible
    pub playing: bool,
}

impl Default for InteractionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            transcript: String::new(),
            response: ResponsePayload::default(),
            finalized: false,
            error: None,
            latency: None,
            playing: false,
        }
    }
}

impl InteractionState {
    /// Latency formatted in seconds with two decimals, when available
    #[must_use]
    pub fn latency_seconds(&self) -> Option<String> {
        self.latency.map(|d| format!("{:.2}", d.as_secs_f64()))
    }
}

/// Typed input union driving the state machine
#[derive(Debug)]
pub enum Input {
    /// User pressed the talk control
    StartCapture,
    /// User stopped recording by hand
    ManualStop,
    /// Recording stopped before any audio was captured
    CaptureDiscarded,
    /// Recording finished with audio (silence, cap, or manual stop)
    UtteranceReady(Utterance),
    /// Capture could not start or failed mid-recording
    CaptureFailed(String),
    /// A well-formed stream event arrived; `elapsed` carries the latency
    /// measurement when this is the terminal event of the turn
    Event {
        /// The inference update
        event: StreamEvent,
        /// Wall-clock delta since the utterance was sent
        elapsed: Option<Duration>,
    },
    /// An inbound frame failed to parse or validate
    Malformed(String),
    /// The streaming transport closed or failed
    StreamClosed,
    /// Sending over the stream failed
    TransportFailed(String),
    /// User submitted a text query
    SubmitQuery(String),
    /// The one-shot query answered
    QueryOk {
        /// The structured answer
        payload: ResponsePayload,
        /// Wall-clock request duration
        elapsed: Duration,
        /// Turn that issued the query; stale results are dropped
        turn: u64,
    },
    /// The one-shot query failed
    QueryFailed {
        /// User-facing failure message
        message: String,
        /// Turn that issued the query; stale failures are dropped
        turn: u64,
    },
    /// A speech segment started playing
    PlaybackStarted,
    /// The playback queue drained
    PlaybackIdle,
    /// A segment failed to decode or play
    PlaybackFailed(String),
    /// User asked to retry after an error
    Retry,
}

/// Side-effect commands for the event loop to execute
#[derive(Debug)]
pub enum Command {
    /// Halt playback and discard queued segments
    StopPlayback,
    /// Acquire the microphone and start recording
    BeginCapture,
    /// Stop recording and finalize the utterance
    EndCapture,
    /// Release the microphone without producing an utterance
    AbortCapture,
    /// Send a finished utterance over the stream
    SendUtterance(Utterance),
    /// Enqueue one decoded speech segment for playback
    EnqueueAudio(Vec<u8>),
    /// Fire the one-shot text query for the given turn
    SendQuery {
        /// The user's question
        text: String,
        /// Turn number to attach to the result
        turn: u64,
    },
    /// Discard any in-flight latency measurement
    ClearLatency,
}

/// The orchestrator: reconciles inputs into state and commands
#[derive(Debug, Default)]
pub struct InteractionController {
    state: InteractionState,
    /// Highest segment index seen this turn, for ordering validation
    last_segment_index: Option<i64>,
    /// Bumped on every new turn; async results carry the turn that issued
    /// them so a superseded turn's late answer cannot land on a new one
    turn: u64,
}

impl InteractionController {
    /// Create a controller in the idle state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of the interaction state
    #[must_use]
    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    /// Apply one input, returning the side-effect commands to execute
    #[allow(clippy::too_many_lines)]
    pub fn handle(&mut self, input: Input) -> Vec<Command> {
        match input {
            Input::StartCapture => self.start_capture(),

            Input::ManualStop => {
                if self.state.phase == Phase::Listening {
                    vec![Command::EndCapture]
                } else {
                    Vec::new()
                }
            }

            Input::CaptureDiscarded => {
                if self.state.phase == Phase::Listening {
                    self.state.phase = Phase::Idle;
                    self.state.transcript.clear();
                }
                Vec::new()
            }

            Input::UtteranceReady(utterance) => {
                if self.state.phase != Phase::Listening {
                    return Vec::new();
                }
                self.state.phase = Phase::AwaitingResponse;
                self.last_segment_index = None;
                vec![Command::SendUtterance(utterance)]
            }

            Input::CaptureFailed(message) => self.fail(message, Vec::new()),

            Input::Event { event, elapsed } => self.stream_event(event, elapsed),

            Input::Malformed(message) => {
                // The stream stays open and the turn is not reset; later
                // well-formed events for the same turn are still honored.
                self.state.error = Some(message);
                self.state.latency = None;
                vec![Command::ClearLatency]
            }

            Input::StreamClosed => {
                let message = Error::TransportClosed.user_message();
                self.fail(
                    message,
                    vec![
                        Command::StopPlayback,
                        Command::AbortCapture,
                        Command::ClearLatency,
                    ],
                )
            }

            Input::TransportFailed(message) => self.fail(
                message,
                vec![Command::StopPlayback, Command::ClearLatency],
            ),

            Input::SubmitQuery(text) => self.submit_query(text),

            Input::QueryOk {
                payload,
                elapsed,
                turn,
            } => {
                if turn != self.turn || self.state.phase != Phase::AwaitingResponse {
                    tracing::debug!(turn, current = self.turn, "dropping stale query result");
                    return Vec::new();
                }
                self.state.phase = Phase::Responding;
                self.state.response = payload;
                self.state.finalized = true;
                self.state.latency = Some(elapsed);
                Vec::new()
            }

            Input::QueryFailed { message, turn } => {
                if turn != self.turn {
                    tracing::debug!(turn, current = self.turn, "dropping stale query failure");
                    return Vec::new();
                }
                self.fail(message, vec![Command::ClearLatency])
            }

            Input::PlaybackStarted => {
                self.state.playing = true;
                Vec::new()
            }

            Input::PlaybackIdle => {
                self.state.playing = false;
                Vec::new()
            }

            Input::PlaybackFailed(message) => self.fail(
                message,
                vec![Command::StopPlayback, Command::ClearLatency],
            ),

            Input::Retry => {
                if self.state.phase != Phase::Error {
                    return Vec::new();
                }
                self.start_capture()
            }
        }
    }

    /// Begin a new audio turn; stale playback always stops first
    fn start_capture(&mut self) -> Vec<Command> {
        if matches!(self.state.phase, Phase::Listening | Phase::AwaitingResponse) {
            return Vec::new();
        }
        self.turn += 1;
        self.state.phase = Phase::Listening;
        self.state.transcript = LISTENING_PLACEHOLDER.to_string();
        self.state.error = None;
        self.state.finalized = false;
        self.state.playing = false;
        self.last_segment_index = None;
        vec![Command::StopPlayback, Command::BeginCapture]
    }

    /// Begin a text turn; bypasses Listening entirely
    fn submit_query(&mut self, text: String) -> Vec<Command> {
        if matches!(self.state.phase, Phase::Listening | Phase::AwaitingResponse) {
            return Vec::new();
        }
        self.turn += 1;
        self.state.phase = Phase::AwaitingResponse;
        self.state.transcript = text.clone();
        self.state.error = None;
        self.state.finalized = false;
        self.state.latency = None;
        self.state.playing = false;
        self.last_segment_index = None;
        vec![
            Command::StopPlayback,
            Command::SendQuery {
                text,
                turn: self.turn,
            },
        ]
    }

    /// Reconcile one inference update into state
    fn stream_event(&mut self, event: StreamEvent, elapsed: Option<Duration>) -> Vec<Command> {
        if self.state.phase != Phase::AwaitingResponse {
            tracing::debug!(
                phase = ?self.state.phase,
                segment = event.segment_index,
                "ignoring stream event outside of a turn"
            );
            return Vec::new();
        }

        // The backend serializes per connection, so indices within one
        // turn never decrease; a decrease means the frames cannot be
        // trusted and the event is treated as malformed.
        if event.segment_index != FINAL_AGGREGATE_INDEX {
            if let Some(prev) = self.last_segment_index {
                if event.segment_index < prev {
                    return self.handle(Input::Malformed(
                        Error::MalformedEvent(format!(
                            "segment index went backwards: {} after {}",
                            event.segment_index, prev
                        ))
                        .user_message(),
                    ));
                }
            }
            self.last_segment_index = Some(event.segment_index);
        }

        self.state.transcript = event.transcript.clone();
        self.state.response = event.response.clone();

        if event.is_last_segment {
            self.state.phase = Phase::Responding;
            self.state.finalized = true;
            self.state.latency = elapsed;
            return Vec::new();
        }

        match event.decode_audio() {
            Ok(Some(audio)) => vec![Command::EnqueueAudio(audio)],
            Ok(None) => Vec::new(),
            Err(e) => self.handle(Input::Malformed(e.user_message())),
        }
    }

    /// Enter the error phase with a user-facing message
    fn fail(&mut self, message: String, commands: Vec<Command>) -> Vec<Command> {
        self.state.phase = Phase::Error;
        self.state.error = Some(message);
        self.state.latency = None;
        self.state.playing = false;
        commands
    }
}
