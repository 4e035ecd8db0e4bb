//! Frame event names, decoded once at the wire boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Event carried by a [`super::Frame`].
///
/// The Phoenix lifecycle events (`phx_*`) are reserved: only the channel
/// state machine may send them. The Absinthe events drive the subscription
/// layer. Anything else is an application event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Event {
    /// `phx_join`: join a channel.
    Join,
    /// `phx_leave`: leave a channel.
    Leave,
    /// `phx_close`: the server closed a channel.
    Close,
    /// `phx_error`: the channel crashed on the server.
    Error,
    /// `phx_reply`: reply correlated to a request by reference.
    Reply,
    /// `heartbeat`: keep-alive on the system channel.
    Heartbeat,
    /// `doc`: submit a GraphQL document on the control channel.
    Doc,
    /// `unsubscribe`: cancel a GraphQL subscription.
    Unsubscribe,
    /// `subscription:data`: one result pushed for a subscription.
    SubscriptionData,
    /// Application-defined event.
    Custom(String),
}

impl Event {
    /// Returns the wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Join => "phx_join",
            Self::Leave => "phx_leave",
            Self::Close => "phx_close",
            Self::Error => "phx_error",
            Self::Reply => "phx_reply",
            Self::Heartbeat => "heartbeat",
            Self::Doc => "doc",
            Self::Unsubscribe => "unsubscribe",
            Self::SubscriptionData => "subscription:data",
            Self::Custom(name) => name,
        }
    }

    /// Returns `true` for the channel lifecycle events callers may not push.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(
            self,
            Self::Join | Self::Leave | Self::Close | Self::Error | Self::Reply
        )
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        match name {
            "phx_join" => Self::Join,
            "phx_leave" => Self::Leave,
            "phx_close" => Self::Close,
            "phx_error" => Self::Error,
            "phx_reply" => Self::Reply,
            "heartbeat" => Self::Heartbeat,
            "doc" => Self::Doc,
            "unsubscribe" => Self::Unsubscribe,
            "subscription:data" => Self::SubscriptionData,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        match Self::from(name.as_str()) {
            Self::Custom(_) => Self::Custom(name),
            known => known,
        }
    }
}

impl From<Event> for String {
    fn from(event: Event) -> Self {
        match event {
            Event::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
