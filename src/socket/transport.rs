//! Physical transport seam.
//!
//! A [`Connector`] opens the socket and hands back a [`Transport`]: a sink
//! of outbound text frames and a stream of inbound ones. The production
//! implementation is [`WebSocketConnector`]; tests plug in the in-memory
//! connector from [`crate::testing`].

use std::fmt;
use std::io;
use std::pin::Pin;

use futures_util::future::{self, BoxFuture};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::error::ChannelError;

/// Outbound half of a transport: accepts JSON text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;

/// Inbound half of a transport: yields JSON text frames until the socket closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// An open socket, split into its two halves.
pub struct Transport {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames.
    pub stream: FrameStream,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens physical sockets.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Performs the transport handshake with `endpoint`.
    ///
    /// The caller bounds the handshake with its own deadline.
    fn connect<'a>(&'a self, endpoint: &'a Url) -> BoxFuture<'a, Result<Transport, ChannelError>>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect<'a>(&'a self, endpoint: &'a Url) -> BoxFuture<'a, Result<Transport, ChannelError>> {
        Box::pin(async move {
            let (ws, _response) = connect_async(endpoint.as_str())
                .await
                .map_err(|err| handshake_error(endpoint, err))?;
            let (ws_tx, ws_rx) = ws.split();

            let sink = ws_tx
                .with(|text: String| future::ready(Ok::<_, tungstenite::Error>(Message::text(text))))
                .sink_map_err(ChannelError::from);

            let stream = ws_rx.filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "received close frame");
                        None
                    }
                    Ok(_) => None,
                    Err(err) => Some(Err(ChannelError::from(err))),
                })
            });

            Ok(Transport {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

/// Maps a failed WebSocket handshake to the connect error taxonomy.
fn handshake_error(endpoint: &Url, err: tungstenite::Error) -> ChannelError {
    match err {
        tungstenite::Error::Io(io_err) if io_err.kind() == io::ErrorKind::ConnectionRefused => {
            ChannelError::ConnectionRefused(redacted(endpoint))
        }
        other => ChannelError::ConnectFailed(other.to_string()),
    }
}

/// Returns the endpoint without its query string, which may carry tokens.
pub(crate) fn redacted(endpoint: &Url) -> String {
    let mut url = endpoint.clone();
    url.set_query(None);
    url.to_string()
}
