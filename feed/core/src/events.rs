//! Stream Events
//!
//! Events as they leave the transports ([`RawEvent`]) and after decoding
//! ([`DomainEvent`]). The event name is mapped to a [`StreamEventKind`] once,
//! at the transport boundary, and never compared as a string again.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::decode::DecodeError;
use crate::model::{Notification, Status, StatusId};

/// Kind of a streamed event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamEventKind {
    /// A new status on the subscribed feed
    Update,
    /// A notification for the local account
    Notification,
    /// A status was deleted
    Delete,
}

impl StreamEventKind {
    /// Map a wire event name; unknown names yield `None`
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "update" => Some(Self::Update),
            "notification" => Some(Self::Notification),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Wire name of this kind
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Notification => "notification",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for StreamEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognized event whose payload has not been decoded yet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEvent {
    /// Event kind
    pub kind: StreamEventKind,
    /// Inner JSON text (or a bare id for deletions)
    pub payload: String,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Option<Value>,
}

impl RawEvent {
    /// Create an event
    pub fn new(kind: StreamEventKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Unwrap a WebSocket text payload
    ///
    /// The WebSocket transport wraps every event as
    /// `{"event": "<name>", "payload": "<json string>"}`. Events with names
    /// this client does not handle yield `Ok(None)`.
    pub fn from_envelope(text: &str) -> Result<Option<Self>, DecodeError> {
        let envelope: Envelope = serde_json::from_str(text)?;

        let Some(kind) = StreamEventKind::from_name(&envelope.event) else {
            return Ok(None);
        };

        let payload = match envelope.payload {
            Some(Value::String(inner)) => inner,
            Some(Value::Null) | None => return Err(DecodeError::MissingField("payload")),
            Some(other) => other.to_string(),
        };

        Ok(Some(Self { kind, payload }))
    }
}

/// A decoded stream event
#[derive(Clone, Debug, PartialEq)]
pub enum DomainEvent {
    /// New status
    Update(Status),
    /// New notification
    Notification(Notification),
    /// Status deletion
    Delete(StatusId),
}
