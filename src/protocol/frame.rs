//! The wire frame: one JSON text message exchanged over the socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Event, Reference};

/// One protocol message.
///
/// Frames are immutable once received. Unknown fields are ignored on
/// decode; `join_ref`, `ref` and `payload` may be absent or `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Reference of the frame that joined the topic, if any.
    #[serde(default)]
    pub join_ref: Option<Reference>,
    /// Reference correlating a request with its reply.
    #[serde(rename = "ref", default)]
    pub reference: Option<Reference>,
    /// Logical channel the frame belongs to.
    pub topic: String,
    /// Event name.
    pub event: Event,
    /// Event-specific payload.
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    /// Creates a frame without references.
    pub fn new(topic: impl Into<String>, event: impl Into<Event>, payload: Value) -> Self {
        Self {
            join_ref: None,
            reference: None,
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    /// Sets the `join_ref` and `ref` fields.
    #[must_use]
    pub fn with_refs(mut self, join_ref: Option<Reference>, reference: Option<Reference>) -> Self {
        self.join_ref = join_ref;
        self.reference = reference;
        self
    }

    /// Decodes a frame from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if the text is not a frame object.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encodes the frame as single-line JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if the payload cannot be serialized.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Returns `true` if this frame is a correlated reply.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.event == Event::Reply
    }
}
