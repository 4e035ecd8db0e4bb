//! Phoenix channel multiplexing over a single socket.
//!
//! [`Connection`] owns the socket and its background loops; [`Channel`]s are
//! the logical pipes multiplexed over it.

pub mod channel;
pub mod connection;
mod pending;
mod registry;
pub mod transport;

pub use channel::{Channel, ChannelState};
pub use connection::{Connection, PushOptions};
pub use registry::ChannelOrigin;
pub use transport::{Connector, FrameSink, FrameStream, Transport, WebSocketConnector};
