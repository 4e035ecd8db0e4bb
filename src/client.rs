//! High-level facade for request/reply calls and one-shot subscriptions.

use std::sync::Arc;

use futures_util::future;
use serde_json::Value;

use crate::absinthe::{SubscribeRequest, SubscriptionId, SubscriptionManager, callback};
use crate::config::SocketConfig;
use crate::error::ChannelError;
use crate::protocol::{Event, Reply};
use crate::socket::{Connection, Connector, WebSocketConnector};
use crate::teardown::TeardownReport;

/// A connected socket with its Absinthe control session.
#[derive(Debug)]
pub struct AbsintheClient {
    connection: Connection,
    manager: SubscriptionManager,
}

impl AbsintheClient {
    /// Connects over WebSocket and joins the control channel.
    ///
    /// # Errors
    ///
    /// Returns the connect error, or [`ChannelError::JoinFailed`] if the
    /// control channel cannot be joined.
    pub async fn connect(config: SocketConfig) -> Result<Self, ChannelError> {
        Self::with_connector(config, Arc::new(WebSocketConnector)).await
    }

    /// Same as [`AbsintheClient::connect`] over a custom transport.
    ///
    /// # Errors
    ///
    /// Same as [`AbsintheClient::connect`].
    pub async fn with_connector(
        config: SocketConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ChannelError> {
        let connection = Connection::with_connector(config, connector);
        connection.connect().await?;
        match SubscriptionManager::enter(&connection).await {
            Ok(manager) => Ok(Self {
                connection,
                manager,
            }),
            Err(err) => {
                let _ = connection.disconnect().await;
                Err(err)
            }
        }
    }

    /// Returns the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns the subscription session.
    #[must_use]
    pub const fn manager(&self) -> &SubscriptionManager {
        &self.manager
    }

    /// Pushes `event` on `topic` and returns the reply's `response`.
    ///
    /// Joins the topic first if needed.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::RequestRejected`] if the reply status is not ok.
    /// - Join, push and transport errors.
    pub async fn execute_request(
        &self,
        topic: &str,
        event: impl Into<Event>,
        payload: Value,
    ) -> Result<Value, ChannelError> {
        let event = event.into();
        let channel = self.connection.channel(topic).await;
        channel.join(Value::Null).await?;

        let reply = Reply::from_payload(&channel.push(event.clone(), payload).await?);
        if reply.is_ok() {
            return Ok(reply.response);
        }
        Err(ChannelError::RequestRejected {
            topic: topic.to_string(),
            event: event.to_string(),
            reason: reply.failure_reason(),
        })
    }

    /// Subscribes `document` and feeds each `result` to `on_event` until it
    /// returns `false` or no data arrives within `timeout`.
    ///
    /// The subscription is unsubscribed and its channel dropped from the
    /// registry once the run ends, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns subscribe errors, or the error that ended the run
    /// (e.g. [`ChannelError::SubscriptionTimeout`]).
    pub async fn open_subscription<F>(
        &self,
        document: &str,
        variables: Value,
        on_event: F,
        timeout: std::time::Duration,
    ) -> Result<SubscriptionId, ChannelError>
    where
        F: Fn(Value) -> bool + Send + Sync + 'static,
    {
        let on_event = Arc::new(on_event);
        let handler = callback(move |frame, _context| {
            let result = frame.payload.get("result").cloned().unwrap_or_default();
            future::ready(on_event(result))
        });
        let request = SubscribeRequest::new(document)
            .variables(variables)
            .callback(handler)
            .timeout(timeout);

        let id = self.manager.subscribe(request).await?;
        let outcome = self.manager.run_subscription(id.as_str()).await;
        let report = self.manager.unsubscribe(id.as_str()).await;
        if !report.is_clean() {
            tracing::debug!(subscription_id = %id, "unsubscribe after run failed");
        }
        self.connection.remove_channel(id.as_str()).await;
        outcome.map(|_| id)
    }

    /// Submits a one-shot document (e.g. a mutation) on the control channel
    /// and returns the raw reply payload.
    ///
    /// # Errors
    ///
    /// Same as [`SubscriptionManager::push_doc`].
    pub async fn push_doc(&self, document: &str, variables: Value) -> Result<Value, ChannelError> {
        let timeout = self.connection.config().doc_timeout;
        self.manager.push_doc(document, variables, timeout).await
    }

    /// Ends the control session and disconnects.
    pub async fn close(&self) -> TeardownReport {
        let mut report = self.manager.leave().await;
        report.merge(self.connection.disconnect().await);
        report
    }
}
