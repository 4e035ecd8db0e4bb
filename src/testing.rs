//! In-memory transport for exercising connections without a network.
//!
//! [`memory_transport`] returns a [`MemoryConnector`] to hand to
//! [`Connection::with_connector`] and the [`MemoryServer`] playing the
//! Phoenix side of the socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::{self, BoxFuture};
use futures_util::{sink, stream};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use url::Url;

use crate::config::SocketConfig;
use crate::error::ChannelError;
use crate::protocol::{Event, Frame};
use crate::socket::transport::redacted;
use crate::socket::{Connection, Connector, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Accept,
    Refuse,
    Stall,
}

type ClientHalves = (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>);

/// Connector whose single socket is backed by in-process channels.
#[derive(Debug)]
pub struct MemoryConnector {
    mode: Mode,
    halves: Mutex<Option<ClientHalves>>,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    fn with_mode(mode: Mode, halves: Option<ClientHalves>) -> Self {
        Self {
            mode,
            halves: Mutex::new(halves),
            attempts: AtomicUsize::new(0),
        }
    }

    /// A connector whose peer refuses every handshake.
    #[must_use]
    pub fn refusing() -> Self {
        Self::with_mode(Mode::Refuse, None)
    }

    /// A connector whose handshake never completes.
    #[must_use]
    pub fn stalled() -> Self {
        Self::with_mode(Mode::Stall, None)
    }

    /// Number of handshakes attempted so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self, endpoint: &'a Url) -> BoxFuture<'a, Result<Transport, ChannelError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            match self.mode {
                Mode::Refuse => return Err(ChannelError::ConnectionRefused(redacted(endpoint))),
                Mode::Stall => future::pending::<()>().await,
                Mode::Accept => {}
            }

            let Some((to_server, from_server)) = self.halves.lock().await.take() else {
                return Err(ChannelError::ConnectFailed(
                    "memory transport already used".to_string(),
                ));
            };

            let sink = sink::unfold(to_server, |tx, text: String| async move {
                tx.send(text).map_err(|_| ChannelError::ConnectionClosed)?;
                Ok::<_, ChannelError>(tx)
            });
            let stream = stream::unfold(from_server, |mut rx| async move {
                rx.recv().await.map(|text| (Ok(text), rx))
            });

            Ok(Transport {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

/// The server end of a memory transport.
#[derive(Debug)]
pub struct MemoryServer {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: Option<mpsc::UnboundedSender<String>>,
}

impl MemoryServer {
    /// Waits for the next frame the client sent.
    ///
    /// Returns `None` once the client closed its half.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let text = self.from_client.recv().await?;
            if let Ok(frame) = Frame::decode(&text) {
                return Some(frame);
            }
        }
    }

    /// Waits for the next non-heartbeat frame, acknowledging heartbeats.
    pub async fn next_request(&mut self) -> Option<Frame> {
        loop {
            let frame = self.next_frame().await?;
            if frame.event == Event::Heartbeat {
                self.reply(&frame, "ok", json!({}));
                continue;
            }
            return Some(frame);
        }
    }

    /// Returns a frame the client already sent, without waiting.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        let text = self.from_client.try_recv().ok()?;
        Frame::decode(&text).ok()
    }

    /// Sends a frame to the client. Returns `false` if the socket is closed.
    pub fn send(&self, frame: &Frame) -> bool {
        frame.encode().is_ok_and(|text| self.send_text(&text))
    }

    /// Sends raw text to the client.
    pub fn send_text(&self, text: &str) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(text.to_string()).is_ok())
    }

    /// Replies to `request` with `{status, response}`.
    pub fn reply(&self, request: &Frame, status: &str, response: Value) -> bool {
        let reply = Frame::new(
            request.topic.clone(),
            Event::Reply,
            json!({ "status": status, "response": response }),
        )
        .with_refs(request.join_ref.clone(), request.reference.clone());
        self.send(&reply)
    }

    /// Pushes a `subscription:data` frame on the subscription's topic.
    pub fn push_data(&self, subscription_id: &str, result: Value) -> bool {
        self.send(&Frame::new(
            subscription_id,
            Event::SubscriptionData,
            json!({ "result": result, "subscriptionId": subscription_id }),
        ))
    }

    /// Closes the server half; the client sees the socket end.
    pub fn close(&mut self) {
        self.to_client = None;
    }
}

/// Creates a connected connector/server pair.
#[must_use]
pub fn memory_transport() -> (MemoryConnector, MemoryServer) {
    let (to_server, from_client) = mpsc::unbounded_channel();
    let (to_client, from_server) = mpsc::unbounded_channel();
    let connector = MemoryConnector::with_mode(Mode::Accept, Some((to_server, from_server)));
    let server = MemoryServer {
        from_client,
        to_client: Some(to_client),
    };
    (connector, server)
}

/// Builds a [`Connection`] over a memory transport and connects it.
///
/// # Errors
///
/// Returns whatever [`Connection::connect`] returns.
pub async fn connected(config: SocketConfig) -> Result<(Connection, MemoryServer), ChannelError> {
    let (connector, server) = memory_transport();
    let connection = Connection::with_connector(config, Arc::new(connector));
    connection.connect().await?;
    Ok((connection, server))
}
