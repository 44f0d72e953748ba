//! Server-Sent Events Transport
//!
//! The alternate streaming transport: a long-lived HTTP response whose body
//! is a sequence of text events.
//!
//! # Wire Format
//!
//! ```text
//! :thump\n                      <- comment / heartbeat, discarded
//! event: update\n
//! data: {"id":"1",\n
//! data: "content":"..."}\n
//! \n                            <- blank line ends the event
//! ```
//!
//! [`SseTokenizer`] is fed arbitrary chunks and yields one [`RawEvent`] per
//! complete event; [`SseClient`] drives it from a reqwest body stream.

use futures::StreamExt;
use tokio::sync::mpsc;
use url::Url;

use super::heartbeat::Liveness;
use super::traits::TransportError;
use crate::events::{RawEvent, StreamEventKind};

const EVENT_PREFIX: &str = "event: ";
const DATA_PREFIX: &str = "data: ";

/// Incremental SSE event tokenizer
#[derive(Debug, Default)]
pub struct SseTokenizer {
    buffer: Vec<u8>,
}

impl SseTokenizer {
    /// Create an empty tokenizer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of the response body
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet consumed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Extract the next recognized event, if a complete one is buffered
    ///
    /// Comments and events with unhandled names are consumed silently, so a
    /// single call may skip several blocks before returning.
    pub fn next_event(&mut self) -> Option<RawEvent> {
        loop {
            if self.buffer.first() == Some(&b':') {
                if let Some(nl) = self.buffer.iter().position(|&b| b == b'\n') {
                    self.buffer.drain(..=nl);
                    continue;
                }
            }

            let end = self.buffer.windows(2).position(|w| w == b"\n\n")?;
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let block = String::from_utf8_lossy(&block[..end]);

            if let Some(event) = parse_block(&block) {
                return Some(event);
            }
        }
    }
}

fn parse_block(block: &str) -> Option<RawEvent> {
    let mut lines = block.split('\n');

    let name = lines.next()?.strip_prefix(EVENT_PREFIX)?;
    let Some(kind) = StreamEventKind::from_name(name.trim_end_matches('\r')) else {
        tracing::trace!(event = name, "Ignoring unhandled SSE event");
        return None;
    };

    let mut data = String::new();
    for line in lines {
        match line.strip_prefix(DATA_PREFIX) {
            Some(chunk) => data.push_str(chunk.trim_end_matches('\r')),
            None => break,
        }
    }

    Some(RawEvent::new(kind, data))
}

/// SSE streaming client over reqwest
#[derive(Debug)]
pub struct SseClient {
    http: reqwest::Client,
    url: Url,
    access_token: String,
    liveness: Liveness,
}

impl SseClient {
    /// Create a client for one streaming URL
    pub fn new(
        http: reqwest::Client,
        url: Url,
        access_token: impl Into<String>,
        liveness: Liveness,
    ) -> Self {
        Self {
            http,
            url,
            access_token: access_token.into(),
            liveness,
        }
    }

    /// Open the stream and forward events until it ends
    ///
    /// Returns `Ok(())` when the event receiver is dropped. End of body or a
    /// body error is reported as [`TransportError::StreamClosed`] or
    /// [`TransportError::ReceiveFailed`].
    pub async fn run(self, events: mpsc::Sender<RawEvent>) -> Result<(), TransportError> {
        let response = self
            .http
            .get(self.url.clone())
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "{} answered {status}",
                self.url
            )));
        }
        tracing::info!(url = %self.url, "Event stream connected");

        let mut body = response.bytes_stream();
        let mut tokenizer = SseTokenizer::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
            self.liveness.record_pong();
            tokenizer.push(&chunk);

            while let Some(event) = tokenizer.next_event() {
                if events.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }

        tracing::warn!(url = %self.url, "Event stream ended");
        Err(TransportError::StreamClosed)
    }
}
