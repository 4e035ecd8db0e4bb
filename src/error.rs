//! Client error types with stable numeric codes.
//!
//! [`ChannelError`] is the central error type of the crate. Transport and
//! protocol failures are typed and returned to the immediate caller; the
//! only places that swallow them are the best-effort teardown paths, which
//! collect them into a [`crate::teardown::TeardownReport`] instead.

use std::time::Duration;

/// Client-side error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category              | Retryable by the caller      |
/// |-----------|-----------------------|------------------------------|
/// | 1000–1999 | Transport / lifecycle | connect and close errors: no |
/// | 2000–2999 | Request / reply       | timeouts and joins: yes      |
/// | 3000–3999 | Usage / configuration | no                           |
/// | 4000–4999 | Subscriptions         | timeouts only                |
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The transport handshake did not complete.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The peer actively refused the TCP connection.
    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    /// The socket closed (or was closed) while the operation was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame could not be written to or read from the socket.
    #[error("transport error: {0}")]
    Transport(String),

    /// A push was attempted before `connect()` or after `disconnect()`.
    #[error("not connected")]
    NotConnected,

    /// A push exhausted its retries without receiving a reply.
    #[error("no reply to {event} on {topic} after {attempts} attempts")]
    Communication {
        /// Topic the push was addressed to.
        topic: String,
        /// Event name of the push.
        event: String,
        /// Number of send attempts made.
        attempts: u32,
    },

    /// The server rejected a channel join, or never answered it.
    #[error("join of {topic} failed: {reason}")]
    JoinFailed {
        /// Topic that could not be joined.
        topic: String,
        /// Reason reported by the server.
        reason: String,
    },

    /// The server answered a request with a non-ok status.
    #[error("{event} on {topic} rejected: {reason}")]
    RequestRejected {
        /// Topic the request was addressed to.
        topic: String,
        /// Event name of the request.
        event: String,
        /// Reason reported by the server.
        reason: String,
    },

    /// A caller tried to push a protocol lifecycle event.
    #[error("{0} is a reserved channel lifecycle event")]
    ReservedEventName(String),

    /// The endpoint URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The reply to a subscription document carried no subscription id.
    #[error("invalid subscribe reply: {0}")]
    InvalidSubscribeReply(String),

    /// A `subscription:data` frame carried no `result`.
    #[error("invalid subscription data: {0}")]
    InvalidSubscriptionData(String),

    /// No subscription data arrived within the receive window.
    #[error("no data on subscription {subscription_id} within {timeout:?}")]
    SubscriptionTimeout {
        /// Subscription that went quiet.
        subscription_id: String,
        /// Receive window that elapsed.
        timeout: Duration,
    },

    /// A frame could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChannelError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::ConnectFailed(_) => 1001,
            Self::ConnectionRefused(_) => 1002,
            Self::ConnectionClosed => 1003,
            Self::Transport(_) => 1004,
            Self::NotConnected => 1005,
            Self::Communication { .. } => 2001,
            Self::JoinFailed { .. } => 2002,
            Self::RequestRejected { .. } => 2003,
            Self::ReservedEventName(_) => 3001,
            Self::InvalidUrl(_) => 3002,
            Self::InvalidConfig(_) => 3003,
            Self::Serialization(_) => 3004,
            Self::InvalidSubscribeReply(_) => 4001,
            Self::InvalidSubscriptionData(_) => 4002,
            Self::SubscriptionTimeout { .. } => 4003,
        }
    }

    /// Returns `true` if repeating the higher-level operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Communication { .. } | Self::JoinFailed { .. } | Self::SubscriptionTimeout { .. }
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::ConnectionClosed,
            other => Self::Transport(other.to_string()),
        }
    }
}
