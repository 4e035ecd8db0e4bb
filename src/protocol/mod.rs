//! Wire protocol: frames, event names, references and replies.
//!
//! Frames are JSON objects with exactly five fields
//! (`join_ref`, `ref`, `topic`, `event`, `payload`). The event name is
//! decoded into [`Event`] once, when the frame is parsed.

pub mod event;
pub mod frame;
pub mod reference;
pub mod reply;

pub use event::Event;
pub use frame::Frame;
pub use reference::{RefCounter, Reference};
pub use reply::Reply;

/// Topic of the Absinthe control channel.
pub const CONTROL_TOPIC: &str = "__absinthe__:control";

/// Topic of the system channel carrying heartbeats.
pub const HEARTBEAT_TOPIC: &str = "phoenix";
