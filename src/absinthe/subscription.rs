//! A live GraphQL subscription and its run-loop.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use super::SubscriptionId;
use crate::error::ChannelError;
use crate::protocol::{Event, Frame};
use crate::socket::Channel;

/// Caller-supplied values handed to every callback invocation.
pub type Context = Map<String, Value>;

/// Handler for subscription data frames.
///
/// Returns `true` to keep listening, `false` to stop the run-loop.
pub type SubscriptionCallback =
    Arc<dyn Fn(Frame, Arc<Context>) -> BoxFuture<'static, bool> + Send + Sync>;

/// Wraps an async closure as a [`SubscriptionCallback`].
pub fn callback<F, Fut>(f: F) -> SubscriptionCallback
where
    F: Fn(Frame, Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    Arc::new(move |frame: Frame, context: Arc<Context>| f(frame, context).boxed())
}

/// One subscription registered with a [`super::SubscriptionManager`].
pub struct Subscription {
    id: SubscriptionId,
    channel: Arc<Channel>,
    callback: Option<SubscriptionCallback>,
    receive_timeout: Duration,
    context: Arc<Context>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.channel.topic())
            .field("has_callback", &self.callback.is_some())
            .field("receive_timeout", &self.receive_timeout)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        channel: Arc<Channel>,
        callback: Option<SubscriptionCallback>,
        receive_timeout: Duration,
        context: Context,
    ) -> Self {
        Self {
            id,
            channel,
            callback,
            receive_timeout,
            context: Arc::new(context),
        }
    }

    /// Returns the server-assigned id.
    #[must_use]
    pub const fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Returns the channel the data frames arrive on.
    #[must_use]
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Returns the window allowed between two frames.
    #[must_use]
    pub const fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    /// Returns the context passed to the callback.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Reads data frames until the callback asks to stop.
    ///
    /// Frames that are not `subscription:data` are skipped. Without a
    /// callback the first data frame is returned; otherwise the loop ends on
    /// the first frame for which the callback returns `false`, and that frame
    /// is returned.
    ///
    /// The loop reads its channel directly, so removing the subscription from
    /// its manager does not interrupt a run already in progress.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::SubscriptionTimeout`] if no frame arrives within the window.
    /// - [`ChannelError::InvalidSubscriptionData`] for a data frame without `result`.
    /// - [`ChannelError::ConnectionClosed`] once the socket is gone.
    pub async fn run(&self) -> Result<Frame, ChannelError> {
        loop {
            let frame = tokio::time::timeout(self.receive_timeout, self.channel.receive())
                .await
                .map_err(|_| ChannelError::SubscriptionTimeout {
                    subscription_id: self.id.to_string(),
                    timeout: self.receive_timeout,
                })??;

            if frame.event != Event::SubscriptionData {
                tracing::debug!(subscription_id = %self.id, event = %frame.event, "skipping non-data frame");
                continue;
            }
            if frame.payload.get("result").is_none() {
                return Err(ChannelError::InvalidSubscriptionData(format!(
                    "frame on {} has no result",
                    self.id
                )));
            }

            let Some(callback) = &self.callback else {
                return Ok(frame);
            };
            if !callback(frame.clone(), Arc::clone(&self.context)).await {
                tracing::debug!(subscription_id = %self.id, "callback stopped subscription");
                return Ok(frame);
            }
        }
    }
}
