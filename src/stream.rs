//! Duplex streaming connection to the inference backend
//!
//! One long-lived WebSocket carries audio turns; text queries go through a
//! separate one-shot HTTP call sharing the same result schema. The
//! connection is never reopened automatically; on close the caller must
//! explicitly reconnect.

use std::time::{Duration, Instant};

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::protocol::{ResponsePayload, StreamEvent, TextQuery, Utterance};
use crate::{Error, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// One inbound notification from the streaming connection
#[derive(Debug)]
pub enum StreamSignal {
    /// A well-formed inference update
    Event(StreamEvent),
    /// An unparseable or invalid frame; the stream stays open
    Malformed(String),
    /// The transport closed or failed; no further events will arrive
    Closed,
}

/// Client side of the persistent duplex connection
pub struct StreamClient {
    sink: WsSink,
    connected: bool,
    request_started: Option<Instant>,
}

impl StreamClient {
    /// Open the streaming connection
    ///
    /// The returned receiver yields one [`StreamSignal`] per inbound frame
    /// until the transport closes.
    ///
    /// # Errors
    ///
    /// Returns error if the WebSocket handshake fails.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<StreamSignal>)> {
        let (ws, _) = connect_async(url).await?;
        tracing::info!(url, "streaming connection established");

        let (sink, mut source) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let signal = match StreamEvent::parse(text.as_str()) {
                            Ok(event) => StreamSignal::Event(event),
                            Err(e) => {
                                tracing::warn!(error = %e, "dropping malformed stream frame");
                                StreamSignal::Malformed(e.to_string())
                            }
                        };
                        if tx.send(signal).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!(?frame, "server closed streaming connection");
                        break;
                    }
                    Ok(_) => {
                        // Ping/pong and binary frames carry no events.
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "streaming connection error");
                        break;
                    }
                }
            }
            let _ = tx.send(StreamSignal::Closed);
        });

        Ok((
            Self {
                sink,
                connected: true,
                request_started: None,
            },
            rx,
        ))
    }

    /// Whether the connection is believed open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Record that the transport closed; further sends fail fast
    pub fn mark_closed(&mut self) {
        self.connected = false;
        self.request_started = None;
    }

    /// Send one finished utterance as a single base64 text message
    ///
    /// Starts the latency clock for this turn.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when the connection is closed, or a
    /// transport error if the send fails (the connection is then marked
    /// closed).
    pub async fn send_utterance(&mut self, utterance: &Utterance) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let payload = utterance.to_wire();
        tracing::debug!(
            bytes = utterance.audio.len(),
            mime = utterance.mime_type,
            "sending utterance"
        );

        if let Err(e) = self.sink.send(Message::Text(payload.into())).await {
            self.mark_closed();
            return Err(e.into());
        }

        self.request_started = Some(Instant::now());
        Ok(())
    }

    /// Take the latency measurement for the turn that just finished
    ///
    /// Returns the wall-clock delta since the utterance was sent, or
    /// `None` when no request is pending.
    pub fn take_latency(&mut self) -> Option<Duration> {
        self.request_started.take().map(|t| t.elapsed())
    }

    /// Discard any pending latency measurement (error paths)
    pub fn clear_latency(&mut self) {
        self.request_started = None;
    }

    /// Close the connection
    pub async fn close(mut self) {
        let _ = self.sink.close().await;
        self.connected = false;
    }
}

/// One-shot text query client
///
/// Independent of the streaming connection; shares the response schema.
#[derive(Clone)]
pub struct QueryClient {
    http: reqwest::Client,
    url: String,
}

impl QueryClient {
    /// Create a query client for the given endpoint URL
    #[must_use]
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }

    /// Send one text query and wait for the structured answer
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueryFailed`] on a non-2xx status or a body
    /// missing the required `response` field.
    pub async fn send(&self, query: &str) -> Result<ResponsePayload> {
        tracing::debug!(query, "sending text query");

        let response = self
            .http
            .post(&self.url)
            .json(&TextQuery { query })
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        parse_query_response(status, &body)
    }
}

/// Validate and decode a text query response body
fn parse_query_response(status: u16, body: &str) -> Result<ResponsePayload> {
    if !(200..300).contains(&status) {
        tracing::error!(status, body, "text query failed");
        return Err(Error::QueryFailed {
            status,
            body: body.to_string(),
        });
    }

    let value: serde_json::Value = serde_json::from_str(body).map_err(|_| Error::QueryFailed {
        status,
        body: body.to_string(),
    })?;
    if !value.get("response").is_some_and(serde_json::Value::is_string) {
        return Err(Error::QueryFailed {
            status,
            body: body.to_string(),
        });
    }

    let payload: ResponsePayload = serde_json::from_value(value)?;
    tracing::debug!(response_len = payload.response.len(), "text query answered");
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_answer() {
        let body = r#"{"response": "Hi.", "links": [], "media_links": [], "personal_info": []}"#;
        let payload = parse_query_response(200, body).unwrap();
        assert_eq!(payload.response, "Hi.");
        assert!(payload.media_links.is_empty());
    }

    #[test]
    fn non_2xx_carries_status_and_body() {
        match parse_query_response(500, "boom") {
            Err(Error::QueryFailed { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_response_field_fails() {
        assert!(matches!(
            parse_query_response(200, r#"{"links": []}"#),
            Err(Error::QueryFailed { status: 200, .. })
        ));
    }

    #[test]
    fn unparseable_body_fails() {
        assert!(matches!(
            parse_query_response(200, "<html>gateway error</html>"),
            Err(Error::QueryFailed { .. })
        ));
    }
}
