//! Domain events exchanged over the broker.
//!
//! The wire format is a UTF-8 JSON object keyed by `EventType`:
//!
//! ```json
//! { "EventType": "UserCreated", "UserId": "11111111-1111-1111-1111-111111111111" }
//! ```
//!
//! Unknown fields are ignored. An `EventType` this build does not know about
//! decodes to [`DecodeError::Unrecognized`] rather than a parse failure, so
//! consumers can tell "skip it" apart from "garbage".

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::UserId;

/// Stable event type names used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    UserCreated,
}

impl EventType {
    /// All event types this build understands.
    pub const ALL: &'static [EventType] = &[EventType::UserCreated];

    /// The wire name of this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserCreated => "UserCreated",
        }
    }

    /// Look up an event type by its wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fact announced by a producing service after it committed the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "EventType")]
pub enum DomainEvent {
    /// A user account was created.
    UserCreated {
        #[serde(rename = "UserId")]
        user_id: UserId,
    },
}

/// Errors produced while decoding an event off the wire.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body was not valid JSON, had no `EventType`, or its payload did
    /// not match the declared type.
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The body was well-formed but named an event type we don't handle.
    #[error("unrecognized event type: {0}")]
    Unrecognized(String),
}

/// Just enough of the envelope to read the dispatch key.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "EventType")]
    event_type: String,
}

impl DomainEvent {
    /// Build a `UserCreated` event.
    pub fn user_created(user_id: UserId) -> Self {
        DomainEvent::UserCreated { user_id }
    }

    /// The dispatch key of this event.
    pub fn event_type(&self) -> EventType {
        match self {
            DomainEvent::UserCreated { .. } => EventType::UserCreated,
        }
    }

    /// The identifier the event is about.
    pub fn user_id(&self) -> UserId {
        match self {
            DomainEvent::UserCreated { user_id } => *user_id,
        }
    }

    /// Encode to the broker-agnostic byte message.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a message body.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(body)?;
        if EventType::from_wire(&envelope.event_type).is_none() {
            return Err(DecodeError::Unrecognized(envelope.event_type));
        }
        Ok(serde_json::from_slice(body)?)
    }
}
