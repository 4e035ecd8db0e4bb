//! Absinthe GraphQL subscriptions over Phoenix channels.
//!
//! [`SubscriptionManager`] drives the control channel; each [`Subscription`]
//! reads the data frames of one server-assigned [`SubscriptionId`].

pub mod manager;
pub mod subscription;
pub mod subscription_id;

pub use manager::{SubscribeRequest, SubscriptionManager};
pub use subscription::{Context, Subscription, SubscriptionCallback, callback};
pub use subscription_id::SubscriptionId;
