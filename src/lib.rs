//! # phoenix-absinthe
//!
//! Client for Phoenix channels and Absinthe GraphQL subscriptions.
//!
//! One WebSocket [`Connection`](socket::Connection) multiplexes any number of
//! [`Channel`](socket::Channel)s. On top of it, a
//! [`SubscriptionManager`](absinthe::SubscriptionManager) joins the Absinthe
//! control channel, submits GraphQL documents and reads subscription data.
//!
//! ## Architecture
//!
//! ```text
//! AbsintheClient (client)
//!     │
//!     ├── SubscriptionManager / Subscription (absinthe/)
//!     │
//!     ├── Channel state machine (socket/channel)
//!     ├── Connection: receive, heartbeat and disconnect-watch loops
//!     │       ├── reply correlation (socket/pending)
//!     │       └── topic registry (socket/registry)
//!     │
//!     ├── Frame codec (protocol/)
//!     └── Connector: tokio-tungstenite WebSocket
//! ```

pub mod absinthe;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod socket;
pub mod teardown;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::AbsintheClient;
pub use config::SocketConfig;
pub use error::ChannelError;
