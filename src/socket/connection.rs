//! Connection: the physical socket and everything multiplexed over it.
//!
//! A [`Connection`] owns the reference counter, the channel registry, the
//! reply-correlation table and three background loops:
//!
//! - **receive**: reads frames, resolves replies by reference, routes
//!   everything else into per-topic queues;
//! - **heartbeat**: pushes `heartbeat` on the system channel at a fixed
//!   interval;
//! - **disconnect-watch**: waits for the link to drop, then tears down.
//!
//! There is a single receive loop per connection. Delivering into a full
//! channel queue suspends it, which stalls delivery to every channel until
//! the slow consumer drains.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::channel::Channel;
use super::pending::{PendingReplies, ReplyWaiter};
use super::registry::{ChannelOrigin, ChannelRegistry};
use super::transport::{Connector, FrameSink, FrameStream, WebSocketConnector, redacted};
use crate::config::SocketConfig;
use crate::error::ChannelError;
use crate::protocol::{Event, Frame, HEARTBEAT_TOPIC, RefCounter};
use crate::teardown::TeardownReport;

/// Timing of a single push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOptions {
    /// Time to wait for the reply to each attempt.
    pub timeout: Duration,
    /// Additional attempts after the first one times out.
    pub retries: u32,
    /// Whether to wait for a correlated reply at all.
    pub wait_for_reply: bool,
}

impl PushOptions {
    /// Creates options that wait for a reply.
    #[must_use]
    pub const fn new(timeout: Duration, retries: u32) -> Self {
        Self {
            timeout,
            retries,
            wait_for_reply: true,
        }
    }

    /// Returns the same options without waiting for a reply.
    #[must_use]
    pub const fn fire_and_forget(mut self) -> Self {
        self.wait_for_reply = false;
        self
    }

    /// Returns the same options with a different timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for PushOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), 3)
    }
}

/// Outcome of one push attempt that did not time out.
enum Attempt {
    Replied(Value),
    Sent,
    Abandoned,
}

/// State shared by the connection handle, its channels and its loops.
pub(crate) struct Shared {
    config: SocketConfig,
    connector: Arc<dyn Connector>,
    refs: RefCounter,
    registry: ChannelRegistry,
    pending: PendingReplies,
    writer: Mutex<Option<FrameSink>>,
    connected: AtomicBool,
    link_down: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    heartbeat: Arc<Channel>,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("url", &self.config.url)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

/// Handle to one multiplexed socket connection.
///
/// Cheap to clone; all clones drive the same socket.
#[derive(Debug, Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Creates a disconnected WebSocket connection.
    #[must_use]
    pub fn new(config: SocketConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Creates a disconnected connection over a custom transport.
    #[must_use]
    pub fn with_connector(config: SocketConfig, connector: Arc<dyn Connector>) -> Self {
        let (link_down, _) = watch::channel(true);
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let heartbeat = Arc::new(Channel::new(
                HEARTBEAT_TOPIC,
                Weak::clone(weak),
                link_down.subscribe(),
                1,
                config.push_options(),
            ));
            Shared {
                registry: ChannelRegistry::new(config.max_inbound_topics),
                config,
                connector,
                refs: RefCounter::new(),
                pending: PendingReplies::new(),
                writer: Mutex::new(None),
                connected: AtomicBool::new(false),
                link_down,
                tasks: Mutex::new(Vec::new()),
                heartbeat,
            }
        });
        Self { shared }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SocketConfig {
        &self.shared.config
    }

    /// Returns `true` between a successful `connect` and `disconnect`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Opens the socket and starts the background loops.
    ///
    /// No-op if already connected.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectFailed`] if the handshake does not
    /// complete within the connect deadline, [`ChannelError::ConnectionRefused`]
    /// if the peer refuses, [`ChannelError::InvalidUrl`], or
    /// [`ChannelError::InvalidConfig`] before any I/O for unusable settings.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let shared = &self.shared;
        let mut tasks = shared.tasks.lock().await;
        if shared.connected.load(Ordering::Acquire) {
            tracing::debug!("connect skipped; already connected");
            return Ok(());
        }

        shared.config.validate()?;
        let endpoint = shared.config.endpoint()?;
        let url = redacted(&endpoint);
        tracing::info!(%url, "connecting");

        let deadline = shared.config.connect_timeout;
        let transport = tokio::time::timeout(deadline, shared.connector.connect(&endpoint))
            .await
            .map_err(|_| {
                ChannelError::ConnectFailed(format!("no handshake with {url} within {deadline:?}"))
            })??;

        *shared.writer.lock().await = Some(transport.sink);
        shared.link_down.send_replace(false);
        shared.connected.store(true, Ordering::Release);

        let weak = Arc::downgrade(shared);
        tasks.push(tokio::spawn(receive_loop(Weak::clone(&weak), transport.stream)));
        tasks.push(tokio::spawn(heartbeat_loop(
            Weak::clone(&weak),
            shared.config.heartbeat_interval,
        )));
        tasks.push(tokio::spawn(disconnect_watch(
            weak,
            shared.link_down.subscribe(),
        )));

        tracing::info!(%url, "connected");
        Ok(())
    }

    /// Returns the channel for `topic`, creating it if needed.
    pub async fn channel(&self, topic: &str) -> Arc<Channel> {
        self.shared
            .registry
            .register(topic, || self.shared.new_channel(topic))
            .await
    }

    /// Removes `topic` from the registry without leaving it.
    ///
    /// Later frames for `topic` land in a fresh inbound placeholder.
    pub async fn remove_channel(&self, topic: &str) -> Option<Arc<Channel>> {
        self.shared.registry.remove(topic).await
    }

    /// Returns how `topic` entered the registry, if it is present.
    pub async fn channel_origin(&self, topic: &str) -> Option<ChannelOrigin> {
        self.shared.registry.origin(topic).await
    }

    /// Returns the number of channels in the registry.
    pub async fn channel_count(&self) -> usize {
        self.shared.registry.len().await
    }

    /// Returns the number of pushes still waiting for a reply.
    pub async fn pending_replies(&self) -> usize {
        self.shared.pending.len().await
    }

    /// Pushes `event` on `channel`, optionally waiting for the correlated reply.
    ///
    /// Each attempt gets a fresh reference. An attempt without a reply
    /// within `options.timeout` is abandoned and resent, up to
    /// `options.retries` more times.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::ReservedEventName`] for lifecycle events, before any I/O.
    /// - [`ChannelError::NotConnected`] before `connect` or after `disconnect`.
    /// - [`ChannelError::Communication`] once every attempt timed out.
    /// - [`ChannelError::ConnectionClosed`] if the socket closes meanwhile.
    pub async fn push(
        &self,
        channel: &Channel,
        event: impl Into<Event>,
        payload: Value,
        options: PushOptions,
    ) -> Result<Option<Value>, ChannelError> {
        self.shared
            .push(channel, event.into(), payload, options)
            .await
    }

    /// Leaves every channel, closes the socket and stops the loops.
    ///
    /// Idempotent. Pushes still waiting for a reply fail with
    /// [`ChannelError::ConnectionClosed`]. Closing the socket is bounded by
    /// the push timeout. Failures are collected, not raised.
    pub async fn disconnect(&self) -> TeardownReport {
        self.shared.disconnect().await
    }
}

impl Shared {
    pub(crate) fn new_channel(self: &Arc<Self>, topic: &str) -> Arc<Channel> {
        Arc::new(Channel::new(
            topic,
            Arc::downgrade(self),
            self.link_down.subscribe(),
            self.config.queue_capacity,
            self.config.push_options(),
        ))
    }

    /// Caller-facing push: rejects lifecycle events.
    pub(crate) async fn push(
        &self,
        channel: &Channel,
        event: Event,
        payload: Value,
        options: PushOptions,
    ) -> Result<Option<Value>, ChannelError> {
        if event.is_reserved() {
            return Err(ChannelError::ReservedEventName(event.to_string()));
        }
        self.send(channel, event, payload, options).await
    }

    /// Sends a frame with retries; used directly by the channel state machine.
    pub(crate) async fn send(
        &self,
        channel: &Channel,
        event: Event,
        payload: Value,
        options: PushOptions,
    ) -> Result<Option<Value>, ChannelError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(ChannelError::NotConnected);
        }
        let payload = if payload.is_null() {
            Value::Object(Map::new())
        } else {
            payload
        };
        let topic = channel.topic();
        let attempts = options.retries.saturating_add(1);

        for attempt in 1..=attempts {
            let reference = self.refs.next();
            if event == Event::Join {
                channel.set_join_ref(Some(reference.clone())).await;
            }
            let frame = Frame::new(topic, event.clone(), payload.clone())
                .with_refs(channel.join_ref().await, Some(reference.clone()));
            let waiter = if options.wait_for_reply {
                Some(self.pending.register(reference.clone()).await)
            } else {
                None
            };

            match tokio::time::timeout(options.timeout, self.exchange(&frame, waiter)).await {
                Ok(Ok(Attempt::Replied(reply))) => return Ok(Some(reply)),
                Ok(Ok(Attempt::Sent)) => return Ok(None),
                Ok(Ok(Attempt::Abandoned)) => {
                    tracing::warn!(topic, %event, %reference, attempt, "reply slot abandoned");
                }
                Ok(Err(err)) => {
                    self.pending.discard(&reference).await;
                    return Err(err);
                }
                Err(_) => {
                    self.pending.discard(&reference).await;
                    tracing::warn!(topic, %event, %reference, attempt, attempts, "no reply within timeout");
                }
            }
        }

        Err(ChannelError::Communication {
            topic: topic.to_string(),
            event: event.to_string(),
            attempts,
        })
    }

    async fn exchange(&self, frame: &Frame, waiter: Option<ReplyWaiter>) -> Result<Attempt, ChannelError> {
        self.write(frame).await?;
        let Some(waiter) = waiter else {
            return Ok(Attempt::Sent);
        };
        match waiter.await {
            Ok(Ok(reply)) => Ok(Attempt::Replied(reply)),
            Ok(Err(err)) => Err(err),
            Err(_) => Ok(Attempt::Abandoned),
        }
    }

    async fn write(&self, frame: &Frame) -> Result<(), ChannelError> {
        let text = frame.encode()?;
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(ChannelError::ConnectionClosed);
        };
        tracing::trace!(frame = %text, "send");
        if let Err(err) = sink.send(text).await {
            self.link_down.send_replace(true);
            return Err(err);
        }
        Ok(())
    }

    /// Handles one inbound text frame.
    async fn dispatch(self: &Arc<Self>, text: &str) {
        tracing::trace!(frame = %text, "recv");
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed frame");
                return;
            }
        };

        if frame.is_reply() {
            let Frame {
                reference,
                topic,
                payload,
                ..
            } = frame;
            let resolved = match &reference {
                Some(reference) => self.pending.resolve(reference, payload).await,
                None => false,
            };
            if !resolved {
                tracing::warn!(%topic, ?reference, "dropping reply nobody is waiting for");
            }
            return;
        }

        let topic = frame.topic.clone();
        match self.registry.route(&topic, || self.new_channel(&topic)).await {
            Some(channel) => channel.deliver(frame).await,
            None => {
                tracing::warn!(%topic, event = %frame.event, "inbound topic limit reached; dropping frame");
            }
        }
    }

    async fn disconnect(self: &Arc<Self>) -> TeardownReport {
        let mut report = TeardownReport::new();
        let mut tasks = self.tasks.lock().await;
        if !self.connected.load(Ordering::Acquire) {
            return report;
        }

        let channels = self.registry.snapshot().await;
        if *self.link_down.borrow() {
            tracing::debug!("link already down; skipping channel leave");
        } else {
            for channel in &channels {
                report.merge(channel.leave().await);
            }
        }
        self.registry.clear().await;
        self.connected.store(false, Ordering::Release);

        let sink = self.writer.lock().await.take();
        let failed = self.pending.fail_all().await;
        self.link_down.send_replace(true);

        if let Some(mut sink) = sink {
            let limit = self.config.push_timeout;
            match tokio::time::timeout(limit, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => report.record("close socket", err),
                Err(_) => report.record(
                    "close socket",
                    ChannelError::Transport(format!("close not acknowledged within {limit:?}")),
                ),
            }
        }

        // Last: this may be running on the watch task itself.
        for task in tasks.drain(..) {
            task.abort();
        }

        tracing::info!(channels = channels.len(), failed_requests = failed, "disconnected");
        report
    }
}

async fn receive_loop(weak: Weak<Shared>, mut stream: FrameStream) {
    while let Some(next) = stream.next().await {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        match next {
            Ok(text) => shared.dispatch(&text).await,
            Err(err) => {
                tracing::warn!(error = %err, "transport error; stopping receive loop");
                break;
            }
        }
    }
    if let Some(shared) = weak.upgrade() {
        tracing::info!("socket closed");
        shared.link_down.send_replace(true);
    }
}

async fn heartbeat_loop(weak: Weak<Shared>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let channel = Arc::clone(&shared.heartbeat);
        let options = shared.config.push_options();
        if let Err(err) = shared
            .send(&channel, Event::Heartbeat, Value::Null, options)
            .await
        {
            tracing::warn!(error = %err, "heartbeat failed");
        }
    }
}

async fn disconnect_watch(weak: Weak<Shared>, mut link_down: watch::Receiver<bool>) {
    if link_down.wait_for(|down| *down).await.is_err() {
        return;
    }
    let Some(shared) = weak.upgrade() else {
        return;
    };
    tracing::warn!("connection lost; tearing down");
    let report = shared.disconnect().await;
    if !report.is_clean() {
        tracing::debug!(failures = report.failures().len(), "teardown after connection loss");
    }
}
