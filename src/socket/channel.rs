//! Channel: a named, stateful logical pipe multiplexed over a connection.
//!
//! State machine:
//!
//! ```text
//! Closed --join()--> Connecting --ok reply--> Open
//!                    Connecting --error / no reply--> Closed
//! Open --leave()--> Closing --any outcome--> Closed
//! ```
//!
//! Inbound frames for the topic are queued in a bounded FIFO that only the
//! connection's receive loop writes to.

use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc, watch};

use super::PushOptions;
use super::connection::Shared;
use crate::error::ChannelError;
use crate::protocol::{Event, Frame, Reference, Reply};
use crate::teardown::TeardownReport;

/// Lifecycle state of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Not joined.
    Closed,
    /// Join sent, waiting for the reply.
    Connecting,
    /// Joined.
    Open,
    /// Leave sent, waiting for the reply.
    Closing,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// A logical channel on a [`super::Connection`].
///
/// Obtained from [`super::Connection::channel`]; shared as `Arc<Channel>`.
#[derive(Debug)]
pub struct Channel {
    topic: String,
    state: watch::Sender<ChannelState>,
    join_ref: RwLock<Option<Reference>>,
    queue_tx: mpsc::Sender<Frame>,
    queue_rx: Mutex<mpsc::Receiver<Frame>>,
    link_down: watch::Receiver<bool>,
    connection: Weak<Shared>,
    push_options: PushOptions,
}

impl Channel {
    pub(crate) fn new(
        topic: &str,
        connection: Weak<Shared>,
        link_down: watch::Receiver<bool>,
        queue_capacity: usize,
        push_options: PushOptions,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        let (state, _) = watch::channel(ChannelState::Closed);
        Self {
            topic: topic.to_string(),
            state,
            join_ref: RwLock::new(None),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            link_down,
            connection,
            push_options,
        }
    }

    /// Returns the channel topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Returns the reference of the frame that joined this channel.
    pub async fn join_ref(&self) -> Option<Reference> {
        self.join_ref.read().await.clone()
    }

    pub(crate) async fn set_join_ref(&self, reference: Option<Reference>) {
        *self.join_ref.write().await = reference;
    }

    /// Returns the push options used by `join`, `leave` and [`Channel::push`].
    #[must_use]
    pub const fn push_options(&self) -> PushOptions {
        self.push_options
    }

    /// Returns the number of frames waiting in the delivery queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    fn connection(&self) -> Result<Arc<Shared>, ChannelError> {
        self.connection.upgrade().ok_or(ChannelError::ConnectionClosed)
    }

    /// Joins the channel.
    ///
    /// Only acts from [`ChannelState::Closed`]; on any other state this is a
    /// no-op, so callers may use it to ensure the channel is joined.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::JoinFailed`] if the server rejects the join
    /// or never answers it. The channel is back in `Closed` in both cases.
    pub async fn join(&self, payload: Value) -> Result<(), ChannelError> {
        let began = self.state.send_if_modified(|state| {
            if *state == ChannelState::Closed {
                *state = ChannelState::Connecting;
                true
            } else {
                false
            }
        });
        if !began {
            tracing::debug!(topic = %self.topic, state = %self.state(), "join skipped");
            return Ok(());
        }

        let outcome = match self.connection() {
            Ok(shared) => {
                shared
                    .send(self, Event::Join, payload, self.push_options)
                    .await
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(payload) => {
                let reply = Reply::from_payload(&payload.unwrap_or_default());
                if reply.is_ok() {
                    self.state.send_replace(ChannelState::Open);
                    tracing::info!(topic = %self.topic, "channel joined");
                    Ok(())
                } else {
                    Err(self.join_failed(reply.failure_reason()).await)
                }
            }
            Err(err) => {
                tracing::warn!(topic = %self.topic, error = %err, "join got no reply");
                Err(self.join_failed("no response from server".to_string()).await)
            }
        }
    }

    async fn join_failed(&self, reason: String) -> ChannelError {
        self.set_join_ref(None).await;
        self.state.send_replace(ChannelState::Closed);
        tracing::warn!(topic = %self.topic, %reason, "join failed");
        ChannelError::JoinFailed {
            topic: self.topic.clone(),
            reason,
        }
    }

    /// Leaves the channel. Best effort: always ends in `Closed`.
    ///
    /// No-op unless the channel is `Open`. A leave that gets no reply is
    /// recorded in the returned report, never raised.
    pub async fn leave(&self) -> TeardownReport {
        let mut report = TeardownReport::new();
        let began = self.state.send_if_modified(|state| {
            if *state == ChannelState::Open {
                *state = ChannelState::Closing;
                true
            } else {
                false
            }
        });
        if !began {
            return report;
        }

        let outcome = match self.connection() {
            Ok(shared) => {
                shared
                    .send(self, Event::Leave, Value::Null, self.push_options)
                    .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            report.record(format!("leave {}", self.topic), err);
        }

        self.set_join_ref(None).await;
        self.state.send_replace(ChannelState::Closed);
        tracing::info!(topic = %self.topic, "channel left");
        report
    }

    /// Pushes an application event and waits for its reply payload.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ReservedEventName`] for lifecycle events,
    /// [`ChannelError::Communication`] once retries are exhausted, or a
    /// transport error.
    pub async fn push(&self, event: impl Into<Event>, payload: Value) -> Result<Value, ChannelError> {
        self.push_with(event, payload, self.push_options)
            .await
            .map(Option::unwrap_or_default)
    }

    /// Pushes an application event with explicit options.
    ///
    /// Returns `None` when `options.wait_for_reply` is false.
    ///
    /// # Errors
    ///
    /// Same as [`Channel::push`].
    pub async fn push_with(
        &self,
        event: impl Into<Event>,
        payload: Value,
        options: PushOptions,
    ) -> Result<Option<Value>, ChannelError> {
        self.connection()?
            .push(self, event.into(), payload, options)
            .await
    }

    /// Waits for the next frame queued for this topic.
    ///
    /// Frames come out in the order the socket produced them. Once the
    /// connection is down, frames already queued are still returned.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionClosed`] when the queue is empty and
    /// no more frames can arrive.
    pub async fn receive(&self) -> Result<Frame, ChannelError> {
        let mut queue = self.queue_rx.lock().await;
        let mut link_down = self.link_down.clone();
        tokio::select! {
            biased;
            frame = queue.recv() => frame.ok_or(ChannelError::ConnectionClosed),
            _ = link_down.wait_for(|down| *down) => {
                queue.try_recv().map_err(|_| ChannelError::ConnectionClosed)
            }
        }
    }

    /// Queues an inbound frame, waiting while the queue is full.
    pub(crate) async fn deliver(&self, frame: Frame) {
        if self.queue_tx.capacity() == 0 {
            tracing::warn!(
                topic = %self.topic,
                "delivery queue full; receive loop stalls until it drains"
            );
        }
        if self.queue_tx.send(frame).await.is_err() {
            tracing::debug!(topic = %self.topic, "delivery queue closed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::SocketConfig;
    use crate::testing::connected;

    /// A channel with no connection behind it.
    pub(crate) fn detached_channel(topic: &str) -> Arc<Channel> {
        let (_, link_down) = watch::channel(true);
        Arc::new(Channel::new(
            topic,
            Weak::new(),
            link_down,
            4,
            PushOptions::default(),
        ))
    }

    fn fast_config() -> SocketConfig {
        SocketConfig::new("ws://memory/socket/websocket")
            .with_push_policy(Duration::from_secs(1), 0)
    }

    #[tokio::test]
    async fn join_ok_opens_channel_and_records_join_ref() {
        let Ok((conn, mut server)) = connected(fast_config()).await else {
            panic!("connect failed");
        };
        let channel = conn.channel("room:lobby").await;
        assert_eq!(channel.state(), ChannelState::Closed);

        let joining = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.join(json!({})).await }
        });

        let Some(join) = server.next_request().await else {
            panic!("join frame expected");
        };
        assert_eq!(join.event, Event::Join);
        assert_eq!(join.topic, "room:lobby");
        assert!(join.reference.is_some());
        assert_eq!(join.join_ref, join.reference);
        assert_eq!(channel.state(), ChannelState::Connecting);

        server.reply(&join, "ok", json!({}));
        let Ok(result) = joining.await else {
            panic!("join task failed");
        };
        assert!(result.is_ok());
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(channel.join_ref().await, join.reference);
    }

    #[tokio::test]
    async fn join_error_reply_reverts_to_closed() {
        let Ok((conn, mut server)) = connected(fast_config()).await else {
            panic!("connect failed");
        };
        let channel = conn.channel("room:secret").await;

        let joining = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.join(json!({})).await }
        });
        let Some(join) = server.next_request().await else {
            panic!("join frame expected");
        };
        server.reply(&join, "error", json!({"reason": "unauthorized"}));

        let Ok(result) = joining.await else {
            panic!("join task failed");
        };
        let Err(ChannelError::JoinFailed { reason, .. }) = result else {
            panic!("expected JoinFailed, got {result:?}");
        };
        assert_eq!(reason, "unauthorized");
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.join_ref().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn join_without_reply_fails_with_no_response() {
        let Ok((conn, _server)) = connected(fast_config()).await else {
            panic!("connect failed");
        };
        let channel = conn.channel("room:void").await;

        let result = channel.join(json!({})).await;
        let Err(ChannelError::JoinFailed { reason, .. }) = result else {
            panic!("expected JoinFailed, got {result:?}");
        };
        assert_eq!(reason, "no response from server");
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn join_is_noop_when_already_open() {
        let Ok((conn, mut server)) = connected(fast_config()).await else {
            panic!("connect failed");
        };
        let channel = conn.channel("room:1").await;
        let joining = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.join(json!({})).await }
        });
        let Some(join) = server.next_request().await else {
            panic!("join frame expected");
        };
        server.reply(&join, "ok", json!({}));
        let _ = joining.await;

        assert!(channel.join(json!({})).await.is_ok());
        assert!(server.try_next_frame().is_none());
    }

    #[tokio::test]
    async fn pushes_carry_join_ref() {
        let Ok((conn, mut server)) = connected(fast_config()).await else {
            panic!("connect failed");
        };
        let channel = conn.channel("room:1").await;
        let joining = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.join(json!({})).await }
        });
        let Some(join) = server.next_request().await else {
            panic!("join frame expected");
        };
        server.reply(&join, "ok", json!({}));
        let _ = joining.await;

        let pushing = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.push("new_msg", json!({"body": "hi"})).await }
        });
        let Some(push) = server.next_request().await else {
            panic!("push frame expected");
        };
        assert_eq!(push.join_ref, join.reference);
        assert_ne!(push.reference, join.reference);
        assert_eq!(push.payload, json!({"body": "hi"}));

        server.reply(&push, "ok", json!({"id": 7}));
        let Ok(Ok(reply)) = pushing.await else {
            panic!("push failed");
        };
        assert_eq!(reply, json!({"status": "ok", "response": {"id": 7}}));
    }

    #[tokio::test]
    async fn leave_is_noop_when_closed() {
        let Ok((conn, mut server)) = connected(fast_config()).await else {
            panic!("connect failed");
        };
        let channel = conn.channel("room:1").await;
        let report = channel.leave().await;
        assert!(report.is_clean());
        assert!(server.try_next_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn leave_swallows_missing_reply() {
        let Ok((conn, mut server)) = connected(fast_config()).await else {
            panic!("connect failed");
        };
        let channel = conn.channel("room:1").await;
        let joining = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.join(json!({})).await }
        });
        let Some(join) = server.next_request().await else {
            panic!("join frame expected");
        };
        server.reply(&join, "ok", json!({}));
        let _ = joining.await;

        let report = channel.leave().await;
        let Some(leave) = server.next_request().await else {
            panic!("leave frame expected");
        };
        assert_eq!(leave.event, Event::Leave);
        assert!(!report.is_clean());
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.join_ref().await, None);
    }

    #[tokio::test]
    async fn receive_yields_frames_in_socket_order() {
        let Ok((conn, server)) = connected(fast_config()).await else {
            panic!("connect failed");
        };
        let channel = conn.channel("room:1").await;
        for n in 1..=3 {
            server.send(&Frame::new("room:1", "shout", json!({ "n": n })));
        }
        for n in 1..=3 {
            let Ok(frame) = channel.receive().await else {
                panic!("frame {n} expected");
            };
            assert_eq!(frame.payload, json!({ "n": n }));
        }
    }

    #[tokio::test]
    async fn receive_on_detached_channel_reports_closed() {
        let channel = detached_channel("orphan");
        assert!(matches!(
            channel.receive().await,
            Err(ChannelError::ConnectionClosed)
        ));
    }
}
