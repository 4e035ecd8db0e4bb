//! Control session: subscribes GraphQL documents over the Absinthe control channel.
//!
//! The manager joins [`CONTROL_TOPIC`], submits documents with `doc` pushes
//! and keeps a map of live [`Subscription`]s keyed by the server-assigned id.
//! Each subscription's data arrives on a channel whose topic is that id.
//!
//! Teardown (`unsubscribe`, `unsubscribe_all`, `leave`, `exit`) is best
//! effort and reports failures in a [`TeardownReport`]. The subscription map
//! is emptied before any `unsubscribe` frame is sent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

use super::subscription::{Context, Subscription, SubscriptionCallback};
use super::SubscriptionId;
use crate::error::ChannelError;
use crate::protocol::{CONTROL_TOPIC, Event, Frame, Reply};
use crate::socket::{Channel, Connection, PushOptions};
use crate::teardown::TeardownReport;

/// Parameters of [`SubscriptionManager::subscribe`].
#[derive(Clone)]
pub struct SubscribeRequest {
    document: String,
    variables: Value,
    callback: Option<SubscriptionCallback>,
    timeout: Option<Duration>,
    auto_start: bool,
    context: Context,
}

impl fmt::Debug for SubscribeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeRequest")
            .field("document", &self.document)
            .field("variables", &self.variables)
            .field("has_callback", &self.callback.is_some())
            .field("timeout", &self.timeout)
            .field("auto_start", &self.auto_start)
            .finish_non_exhaustive()
    }
}

impl SubscribeRequest {
    /// Creates a request for a GraphQL subscription document.
    #[must_use]
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            variables: Value::Object(Map::new()),
            callback: None,
            timeout: None,
            auto_start: false,
            context: Context::new(),
        }
    }

    /// Sets the document variables.
    #[must_use]
    pub fn variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    /// Sets the handler invoked for every data frame.
    #[must_use]
    pub fn callback(mut self, callback: SubscriptionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Sets the window allowed between two data frames.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Runs the subscription as part of `subscribe`.
    #[must_use]
    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Sets the context handed to the callback.
    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// GraphQL subscription session on one connection.
#[derive(Debug)]
pub struct SubscriptionManager {
    connection: Connection,
    control: Arc<Channel>,
    subscriptions: Mutex<HashMap<SubscriptionId, Arc<Subscription>>>,
    exited: AtomicBool,
}

impl SubscriptionManager {
    /// Creates a manager for `connection` without joining the control channel.
    pub async fn new(connection: &Connection) -> Self {
        let control = connection.channel(CONTROL_TOPIC).await;
        Self {
            connection: connection.clone(),
            control,
            subscriptions: Mutex::new(HashMap::new()),
            exited: AtomicBool::new(false),
        }
    }

    /// Creates a manager and joins the control channel.
    ///
    /// Pair with [`SubscriptionManager::exit`], or use
    /// [`SubscriptionManager::scoped`].
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::JoinFailed`] if the control channel cannot be joined.
    pub async fn enter(connection: &Connection) -> Result<Self, ChannelError> {
        let manager = Self::new(connection).await;
        if let Err(err) = manager.join().await {
            manager.exited.store(true, Ordering::Release);
            return Err(err);
        }
        Ok(manager)
    }

    /// Runs `body` between [`enter`](Self::enter) and [`exit`](Self::exit).
    ///
    /// The manager is exited whether `body` succeeds or fails; teardown
    /// failures are logged, never returned.
    ///
    /// # Errors
    ///
    /// Returns the join error, or whatever `body` returns.
    pub async fn scoped<T, F>(connection: &Connection, body: F) -> Result<T, ChannelError>
    where
        F: for<'a> FnOnce(&'a Self) -> BoxFuture<'a, Result<T, ChannelError>>,
    {
        let manager = Self::enter(connection).await?;
        let result = body(&manager).await;
        let report = manager.exit().await;
        if !report.is_clean() {
            tracing::debug!(failures = report.failures().len(), "subscription session closed with failures");
        }
        result
    }

    /// Joins the control channel. No-op if already joined.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::JoinFailed`] if the server rejects the join or
    /// never answers it.
    pub async fn join(&self) -> Result<(), ChannelError> {
        self.control.join(Value::Null).await
    }

    /// Returns the control channel.
    #[must_use]
    pub fn control(&self) -> &Arc<Channel> {
        &self.control
    }

    /// Returns the connection this session runs on.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    fn control_options(&self, timeout: Duration) -> PushOptions {
        self.connection.config().push_options().with_timeout(timeout)
    }

    /// Pushes a `doc` event carrying `{query, variables}` and returns the
    /// raw reply payload.
    ///
    /// Used to install subscriptions and to submit one-shot mutations.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Communication`] if no reply arrives, or a
    /// transport error.
    pub async fn push_doc(
        &self,
        document: &str,
        variables: Value,
        timeout: Duration,
    ) -> Result<Value, ChannelError> {
        let variables = if variables.is_null() {
            Value::Object(Map::new())
        } else {
            variables
        };
        let payload = json!({ "query": document, "variables": variables });
        self.control
            .push_with(Event::Doc, payload, self.control_options(timeout))
            .await
            .map(Option::unwrap_or_default)
    }

    /// Subscribes a document and returns the server-assigned id.
    ///
    /// Joins the control channel if needed. The subscription's own channel
    /// is created without a join handshake. With `auto_start`, the
    /// subscription is run before returning.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::InvalidSubscribeReply`] if the reply is not ok or has
    ///   no `subscriptionId`; no subscription is recorded in that case.
    /// - Join, push and run errors.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<SubscriptionId, ChannelError> {
        self.join().await?;

        let config = self.connection.config();
        let payload = self
            .push_doc(&request.document, request.variables, config.subscribe_timeout)
            .await?;
        let reply = Reply::from_payload(&payload);
        if !reply.is_ok() {
            return Err(ChannelError::InvalidSubscribeReply(format!(
                "status {}: {}",
                reply.status,
                reply.failure_reason()
            )));
        }
        let id = match reply.response_str("subscriptionId") {
            Some(id) if !id.is_empty() => SubscriptionId::new(id),
            _ => {
                return Err(ChannelError::InvalidSubscribeReply(
                    "reply has no subscriptionId".to_string(),
                ));
            }
        };

        let channel = self.connection.channel(id.as_str()).await;
        let subscription = Arc::new(Subscription::new(
            id.clone(),
            channel,
            request.callback,
            request.timeout.unwrap_or(config.subscription_timeout),
            request.context,
        ));
        self.subscriptions
            .lock()
            .await
            .insert(id.clone(), Arc::clone(&subscription));
        tracing::info!(subscription_id = %id, "subscribed");

        if request.auto_start {
            subscription.run().await?;
        }
        Ok(id)
    }

    /// Runs the subscription `id`.
    ///
    /// Returns `None` without doing anything if `id` is not subscribed.
    ///
    /// # Errors
    ///
    /// Same as [`Subscription::run`].
    pub async fn run_subscription(&self, id: &str) -> Result<Option<Frame>, ChannelError> {
        let Some(subscription) = self.get(id).await else {
            tracing::debug!(subscription_id = id, "run skipped; not subscribed");
            return Ok(None);
        };
        subscription.run().await.map(Some)
    }

    /// Removes `id` and tells the server to stop it. No-op for unknown ids.
    pub async fn unsubscribe(&self, id: &str) -> TeardownReport {
        let removed = self.subscriptions.lock().await.remove_entry(id);
        match removed {
            Some((id, _)) => send_unsubscribe(&self.control, &id, self.unsubscribe_options()).await,
            None => TeardownReport::new(),
        }
    }

    /// Removes every subscription, then unsubscribes each one.
    ///
    /// Runs already in progress keep reading their channels until their own
    /// timeout or callback ends them.
    pub async fn unsubscribe_all(&self) -> TeardownReport {
        let drained = std::mem::take(&mut *self.subscriptions.lock().await);
        let options = self.unsubscribe_options();
        let mut report = TeardownReport::new();
        for id in drained.into_keys() {
            report.merge(send_unsubscribe(&self.control, &id, options).await);
        }
        report
    }

    /// Unsubscribes everything and leaves the control channel.
    pub async fn leave(&self) -> TeardownReport {
        let mut report = self.unsubscribe_all().await;
        report.merge(self.control.leave().await);
        self.exited.store(true, Ordering::Release);
        report
    }

    /// Ends the session; see [`SubscriptionManager::leave`].
    pub async fn exit(self) -> TeardownReport {
        self.leave().await
    }

    fn unsubscribe_options(&self) -> PushOptions {
        self.control_options(self.connection.config().doc_timeout)
    }

    /// Returns the number of live subscriptions.
    pub async fn len(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Returns `true` if there are no live subscriptions.
    pub async fn is_empty(&self) -> bool {
        self.subscriptions.lock().await.is_empty()
    }

    /// Returns `true` if `id` is subscribed.
    pub async fn contains(&self, id: &str) -> bool {
        self.subscriptions.lock().await.contains_key(id)
    }

    /// Returns the ids of all live subscriptions.
    pub async fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.lock().await.keys().cloned().collect()
    }

    /// Returns the subscription `id`, if live.
    pub async fn get(&self, id: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.lock().await.get(id).map(Arc::clone)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if self.exited.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("subscription manager dropped outside a runtime; skipping teardown");
            return;
        };
        let ids: Vec<SubscriptionId> = std::mem::take(self.subscriptions.get_mut())
            .into_keys()
            .collect();
        let control = Arc::clone(&self.control);
        let options = self.unsubscribe_options();
        tracing::debug!(subscriptions = ids.len(), "subscription manager dropped without exit");
        runtime.spawn(async move {
            let mut report = TeardownReport::new();
            for id in &ids {
                report.merge(send_unsubscribe(&control, id, options).await);
            }
            report.merge(control.leave().await);
            if !report.is_clean() {
                tracing::debug!(failures = report.failures().len(), "background teardown finished");
            }
        });
    }
}

async fn send_unsubscribe(control: &Channel, id: &SubscriptionId, options: PushOptions) -> TeardownReport {
    let mut report = TeardownReport::new();
    let payload = json!({ "subscriptionId": id });
    match control.push_with(Event::Unsubscribe, payload, options).await {
        Ok(_) => tracing::info!(subscription_id = %id, "unsubscribed"),
        Err(err) => report.record(format!("unsubscribe {id}"), err),
    }
    report
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use futures_util::FutureExt;

    use super::*;
    use crate::config::SocketConfig;
    use crate::socket::ChannelState;
    use crate::testing::{MemoryServer, connected};

    fn config() -> SocketConfig {
        SocketConfig::default().with_push_policy(Duration::from_secs(1), 0)
    }

    /// Answers the control join (if any) and the next `doc` push.
    async fn answer_subscribe(server: &mut MemoryServer, response: Value) -> Frame {
        loop {
            let Some(frame) = server.next_request().await else {
                panic!("client went away");
            };
            match frame.event {
                Event::Join => {
                    server.reply(&frame, "ok", json!({}));
                }
                Event::Doc => {
                    server.reply(&frame, "ok", response);
                    return frame;
                }
                other => panic!("unexpected {other} frame"),
            }
        }
    }

    async fn subscribed(
        manager: &Arc<SubscriptionManager>,
        server: &mut MemoryServer,
        id: &str,
    ) -> SubscriptionId {
        let subscribing = tokio::spawn({
            let manager = Arc::clone(manager);
            async move { manager.subscribe(SubscribeRequest::new("subscription { ticks }")).await }
        });
        answer_subscribe(server, json!({ "subscriptionId": id })).await;
        let Ok(Ok(id)) = subscribing.await else {
            panic!("subscribe failed");
        };
        id
    }

    #[tokio::test]
    async fn subscribe_returns_server_id() {
        let Ok((conn, mut server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let manager = Arc::new(SubscriptionManager::new(&conn).await);

        let subscribing = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move {
                manager
                    .subscribe(SubscribeRequest::new("subscription { ticks }").variables(json!({"n": 1})))
                    .await
            }
        });
        let doc = answer_subscribe(&mut server, json!({ "subscriptionId": "q1" })).await;
        assert_eq!(doc.topic, CONTROL_TOPIC);
        assert_eq!(
            doc.payload,
            json!({"query": "subscription { ticks }", "variables": {"n": 1}})
        );

        let Ok(Ok(id)) = subscribing.await else {
            panic!("subscribe failed");
        };
        assert_eq!(id.as_str(), "q1");
        assert_eq!(manager.len().await, 1);
        assert!(manager.contains("q1").await);
        assert_eq!(manager.control().state(), ChannelState::Open);

        // The subscription channel exists but was never joined.
        let Some(subscription) = manager.get("q1").await else {
            panic!("subscription expected");
        };
        assert_eq!(subscription.channel().state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn reply_without_subscription_id_is_rejected() {
        let Ok((conn, mut server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let manager = Arc::new(SubscriptionManager::new(&conn).await);

        let subscribing = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.subscribe(SubscribeRequest::new("subscription { ticks }")).await }
        });
        answer_subscribe(&mut server, json!({})).await;

        let Ok(result) = subscribing.await else {
            panic!("subscribe task failed");
        };
        assert!(matches!(result, Err(ChannelError::InvalidSubscribeReply(_))));
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn error_status_is_rejected() {
        let Ok((conn, mut server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let manager = Arc::new(SubscriptionManager::new(&conn).await);

        let subscribing = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.subscribe(SubscribeRequest::new("subscription { nope }")).await }
        });
        loop {
            let Some(frame) = server.next_request().await else {
                panic!("client went away");
            };
            if frame.event == Event::Doc {
                server.reply(&frame, "error", json!({"errors": [{"message": "unknown field"}]}));
                break;
            }
            server.reply(&frame, "ok", json!({}));
        }

        let Ok(result) = subscribing.await else {
            panic!("subscribe task failed");
        };
        assert!(matches!(result, Err(ChannelError::InvalidSubscribeReply(_))));
        assert_eq!(manager.len().await, 0);
    }

    #[tokio::test]
    async fn auto_start_runs_until_first_frame() {
        let Ok((conn, mut server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let manager = Arc::new(SubscriptionManager::new(&conn).await);

        let subscribing = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move {
                manager
                    .subscribe(SubscribeRequest::new("subscription { ticks }").auto_start(true))
                    .await
            }
        });
        answer_subscribe(&mut server, json!({ "subscriptionId": "q7" })).await;
        server.push_data("q7", json!({"data": {"ticks": 1}}));

        let Ok(Ok(id)) = subscribing.await else {
            panic!("subscribe failed");
        };
        assert_eq!(id.as_str(), "q7");
    }

    #[tokio::test]
    async fn data_racing_the_reply_is_kept() {
        let Ok((conn, mut server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let manager = Arc::new(SubscriptionManager::new(&conn).await);

        let subscribing = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.subscribe(SubscribeRequest::new("subscription { ticks }")).await }
        });
        loop {
            let Some(frame) = server.next_request().await else {
                panic!("client went away");
            };
            if frame.event == Event::Doc {
                server.push_data("q9", json!({"data": {"ticks": 1}}));
                server.reply(&frame, "ok", json!({"subscriptionId": "q9"}));
                break;
            }
            server.reply(&frame, "ok", json!({}));
        }
        let Ok(Ok(id)) = subscribing.await else {
            panic!("subscribe failed");
        };

        let Ok(Some(frame)) = manager.run_subscription(id.as_str()).await else {
            panic!("queued frame expected");
        };
        assert_eq!(frame.topic, "q9");
    }

    #[tokio::test]
    async fn run_of_unknown_subscription_is_noop() {
        let Ok((conn, _server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let manager = SubscriptionManager::new(&conn).await;
        assert!(matches!(manager.run_subscription("gone").await, Ok(None)));
    }

    #[tokio::test]
    async fn unsubscribe_twice_sends_one_frame() {
        let Ok((conn, mut server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let manager = Arc::new(SubscriptionManager::new(&conn).await);
        let id = subscribed(&manager, &mut server, "q1").await;

        let first = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.unsubscribe("q1").await }
        });
        let Some(frame) = server.next_request().await else {
            panic!("unsubscribe frame expected");
        };
        assert_eq!(frame.event, Event::Unsubscribe);
        assert_eq!(frame.topic, CONTROL_TOPIC);
        assert_eq!(frame.payload, json!({ "subscriptionId": id }));
        server.reply(&frame, "ok", json!({}));
        let Ok(report) = first.await else {
            panic!("unsubscribe task failed");
        };
        assert!(report.is_clean());

        let second = manager.unsubscribe("q1").await;
        assert!(second.is_clean());
        assert!(server.try_next_frame().is_none());
        assert!(manager.is_empty().await);
        // The data channel stays registered.
        assert!(conn.channel_origin("q1").await.is_some());
    }

    #[tokio::test]
    async fn teardown_empties_map_before_unsubscribing() {
        let Ok((conn, mut server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let manager = Arc::new(SubscriptionManager::new(&conn).await);
        let _ = subscribed(&manager, &mut server, "q1").await;
        let _ = subscribed(&manager, &mut server, "q2").await;
        let mut ids = manager.subscription_ids().await;
        ids.sort();
        assert_eq!(ids, vec![SubscriptionId::from("q1"), SubscriptionId::from("q2")]);

        let leaving = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.leave().await }
        });

        let mut unsubscribed = Vec::new();
        loop {
            let Some(frame) = server.next_request().await else {
                panic!("client went away");
            };
            server.reply(&frame, "ok", json!({}));
            match frame.event {
                Event::Unsubscribe => {
                    assert_eq!(frame.topic, CONTROL_TOPIC);
                    assert_eq!(manager.len().await, 0);
                    unsubscribed.push(
                        frame
                            .payload
                            .get("subscriptionId")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    );
                }
                Event::Leave => break,
                other => panic!("unexpected {other} frame"),
            }
        }
        unsubscribed.sort();
        assert_eq!(
            unsubscribed,
            vec![Some("q1".to_string()), Some("q2".to_string())]
        );

        let Ok(report) = leaving.await else {
            panic!("leave task failed");
        };
        assert!(report.is_clean());
        assert_eq!(manager.control().state(), ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_unsubscribe_is_reported_not_raised() {
        let Ok((conn, mut server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let manager = Arc::new(SubscriptionManager::new(&conn).await);
        let _ = subscribed(&manager, &mut server, "q1").await;

        let report = manager.unsubscribe("q1").await;
        let [failure] = report.failures() else {
            panic!("one failure expected");
        };
        assert_eq!(failure.step, "unsubscribe q1");
        assert!(matches!(failure.error, ChannelError::Communication { .. }));
    }

    #[tokio::test]
    async fn scoped_joins_and_leaves_control() {
        let Ok((conn, mut server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let observer = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(frame) = server.next_request().await {
                server.reply(&frame, "ok", json!({}));
                let done = frame.event == Event::Leave;
                events.push(frame.event);
                if done {
                    break;
                }
            }
            events
        });

        let result = SubscriptionManager::scoped(&conn, |manager| {
            async move {
                assert_eq!(manager.control().state(), ChannelState::Open);
                Ok::<_, ChannelError>(manager.len().await)
            }
            .boxed()
        })
        .await;
        assert!(matches!(result, Ok(0)));

        let Ok(events) = observer.await else {
            panic!("observer failed");
        };
        assert_eq!(events, vec![Event::Join, Event::Leave]);
    }

    #[tokio::test]
    async fn scoped_exits_when_body_fails() {
        let Ok((conn, mut server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let observer = tokio::spawn(async move {
            let mut saw_leave = false;
            while let Some(frame) = server.next_request().await {
                server.reply(&frame, "ok", json!({}));
                if frame.event == Event::Leave {
                    saw_leave = true;
                    break;
                }
            }
            saw_leave
        });

        let result: Result<(), ChannelError> =
            SubscriptionManager::scoped(&conn, |_manager| async { Err(ChannelError::NotConnected) }.boxed())
                .await;
        assert!(matches!(result, Err(ChannelError::NotConnected)));
        assert!(matches!(observer.await, Ok(true)));
    }

    #[tokio::test]
    async fn dropping_without_exit_tears_down_in_background() {
        let Ok((conn, mut server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let manager = Arc::new(SubscriptionManager::new(&conn).await);
        let _ = subscribed(&manager, &mut server, "q1").await;
        let _ = subscribed(&manager, &mut server, "q2").await;
        drop(manager);

        let mut unsubscribed = Vec::new();
        loop {
            let Some(frame) = server.next_request().await else {
                panic!("client went away");
            };
            assert_eq!(frame.topic, CONTROL_TOPIC);
            server.reply(&frame, "ok", json!({}));
            match frame.event {
                Event::Unsubscribe => unsubscribed.push(
                    frame
                        .payload
                        .get("subscriptionId")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                ),
                Event::Leave => break,
                other => panic!("unexpected {other} frame"),
            }
        }
        unsubscribed.sort();
        assert_eq!(
            unsubscribed,
            vec![Some("q1".to_string()), Some("q2".to_string())]
        );
    }

    async fn panicking_body(_manager: &SubscriptionManager) -> Result<(), ChannelError> {
        panic!("session body failed")
    }

    #[tokio::test]
    async fn scoped_leaves_control_when_body_panics() {
        let Ok((conn, mut server)) = connected(config()).await else {
            panic!("connect failed");
        };
        let observer = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(frame) = server.next_request().await {
                server.reply(&frame, "ok", json!({}));
                let done = frame.event == Event::Leave;
                events.push(frame.event);
                if done {
                    break;
                }
            }
            events
        });

        let session = tokio::spawn({
            let conn = conn.clone();
            async move { SubscriptionManager::scoped(&conn, |manager| panicking_body(manager).boxed()).await }
        });
        let Err(err) = session.await else {
            panic!("session should have panicked");
        };
        assert!(err.is_panic());

        let Ok(events) = observer.await else {
            panic!("observer failed");
        };
        assert_eq!(events, vec![Event::Join, Event::Leave]);
    }
}
