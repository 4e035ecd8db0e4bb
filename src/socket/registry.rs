//! Topic → channel registry of one connection.
//!
//! [`ChannelRegistry`] distinguishes channels a caller asked for
//! (*registered*) from placeholders the receive loop created because a frame
//! arrived for a topic nobody had asked for yet (*inbound*). Subscription
//! data for a freshly assigned subscription id can race ahead of the
//! subscribe reply, so inbound placeholders keep those frames until the
//! caller claims the topic. Their number is bounded.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::channel::Channel;

/// How a registry entry came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrigin {
    /// Requested through [`super::Connection::channel`].
    Registered,
    /// Created by the receive loop for an unrecognized topic.
    Inbound,
}

#[derive(Debug)]
struct Entry {
    channel: Arc<Channel>,
    origin: ChannelOrigin,
}

/// Concurrent map of the channels multiplexed over a connection.
#[derive(Debug)]
pub(crate) struct ChannelRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    inbound_limit: usize,
}

impl ChannelRegistry {
    /// Creates an empty registry allowing `inbound_limit` placeholders.
    pub(crate) fn new(inbound_limit: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            inbound_limit,
        }
    }

    /// Returns the registered channel for `topic`, creating it with `make`
    /// if absent. An inbound placeholder is promoted and keeps its queue.
    pub(crate) async fn register(
        &self,
        topic: &str,
        make: impl FnOnce() -> Arc<Channel>,
    ) -> Arc<Channel> {
        let mut map = self.entries.write().await;
        if let Some(entry) = map.get_mut(topic) {
            if entry.origin == ChannelOrigin::Inbound {
                tracing::debug!(topic, "claiming inbound channel");
                entry.origin = ChannelOrigin::Registered;
            }
            return Arc::clone(&entry.channel);
        }
        let channel = make();
        map.insert(
            topic.to_string(),
            Entry {
                channel: Arc::clone(&channel),
                origin: ChannelOrigin::Registered,
            },
        );
        channel
    }

    /// Returns the channel an inbound frame for `topic` should be queued on.
    ///
    /// Creates an inbound placeholder for unknown topics while under the
    /// limit; returns `None` once the limit is reached.
    pub(crate) async fn route(
        &self,
        topic: &str,
        make: impl FnOnce() -> Arc<Channel>,
    ) -> Option<Arc<Channel>> {
        if let Some(entry) = self.entries.read().await.get(topic) {
            return Some(Arc::clone(&entry.channel));
        }

        let mut map = self.entries.write().await;
        if let Some(entry) = map.get(topic) {
            return Some(Arc::clone(&entry.channel));
        }
        let inbound = map
            .values()
            .filter(|entry| entry.origin == ChannelOrigin::Inbound)
            .count();
        if inbound >= self.inbound_limit {
            return None;
        }
        tracing::warn!(topic, "frame arrived for unknown topic; creating inbound channel");
        let channel = make();
        map.insert(
            topic.to_string(),
            Entry {
                channel: Arc::clone(&channel),
                origin: ChannelOrigin::Inbound,
            },
        );
        Some(channel)
    }

    /// Removes `topic`, returning its channel.
    pub(crate) async fn remove(&self, topic: &str) -> Option<Arc<Channel>> {
        self.entries.write().await.remove(topic).map(|entry| entry.channel)
    }

    /// Returns the origin of `topic`, if present.
    pub(crate) async fn origin(&self, topic: &str) -> Option<ChannelOrigin> {
        self.entries.read().await.get(topic).map(|entry| entry.origin)
    }

    /// Returns every channel currently in the registry.
    pub(crate) async fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| Arc::clone(&entry.channel))
            .collect()
    }

    /// Removes every entry.
    pub(crate) async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Returns the number of entries.
    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::socket::channel::tests::detached_channel;

    #[tokio::test]
    async fn register_returns_same_channel() {
        let registry = ChannelRegistry::new(4);
        let first = registry.register("room:1", || detached_channel("room:1")).await;
        let second = registry.register("room:1", || detached_channel("room:1")).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 1);
        assert_eq!(
            registry.origin("room:1").await,
            Some(ChannelOrigin::Registered)
        );
    }

    #[tokio::test]
    async fn route_creates_inbound_placeholder() {
        let registry = ChannelRegistry::new(4);
        let routed = registry.route("q1", || detached_channel("q1")).await;
        assert!(routed.is_some());
        assert_eq!(registry.origin("q1").await, Some(ChannelOrigin::Inbound));
    }

    #[tokio::test]
    async fn register_promotes_inbound_and_keeps_channel() {
        let registry = ChannelRegistry::new(4);
        let Some(inbound) = registry.route("q1", || detached_channel("q1")).await else {
            panic!("placeholder expected");
        };
        let claimed = registry.register("q1", || detached_channel("q1")).await;
        assert!(Arc::ptr_eq(&inbound, &claimed));
        assert_eq!(registry.origin("q1").await, Some(ChannelOrigin::Registered));
    }

    #[tokio::test]
    async fn inbound_placeholders_are_bounded() {
        let registry = ChannelRegistry::new(2);
        assert!(registry.route("a", || detached_channel("a")).await.is_some());
        assert!(registry.route("b", || detached_channel("b")).await.is_some());
        assert!(registry.route("c", || detached_channel("c")).await.is_none());

        // Registered channels do not count against the limit.
        let _ = registry.register("d", || detached_channel("d")).await;
        assert!(registry.route("d", || detached_channel("d")).await.is_some());
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let registry = ChannelRegistry::new(4);
        let _ = registry.register("a", || detached_channel("a")).await;
        let _ = registry.register("b", || detached_channel("b")).await;

        assert!(registry.remove("a").await.is_some());
        assert!(registry.remove("a").await.is_none());
        assert_eq!(registry.snapshot().await.len(), 1);

        registry.clear().await;
        assert_eq!(registry.len().await, 0);
    }
}
