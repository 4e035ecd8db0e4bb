//! Reply-correlation table.
//!
//! Every push that waits for a reply registers a one-shot slot keyed by its
//! reference. The receive loop resolves the slot when the matching
//! `phx_reply` arrives; the pushing call discards it on timeout; teardown
//! fails every remaining slot with [`ChannelError::ConnectionClosed`].

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{Mutex, oneshot};

use crate::error::ChannelError;
use crate::protocol::Reference;

/// Receiving end of a pending-result slot.
pub(crate) type ReplyWaiter = oneshot::Receiver<Result<Value, ChannelError>>;

/// Outstanding requests awaiting a reply, keyed by reference.
#[derive(Debug, Default)]
pub(crate) struct PendingReplies {
    slots: Mutex<HashMap<Reference, oneshot::Sender<Result<Value, ChannelError>>>>,
}

impl PendingReplies {
    /// Creates an empty table.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates the slot for `reference`.
    ///
    /// If the reference wrapped onto a slot that is still outstanding, the
    /// old slot is abandoned and its waiter observes a closed channel.
    pub(crate) async fn register(&self, reference: Reference) -> ReplyWaiter {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().await;
        if slots.insert(reference.clone(), tx).is_some() {
            tracing::warn!(%reference, "reference reused while still pending; abandoning old slot");
        }
        rx
    }

    /// Resolves the slot for `reference` with a reply payload.
    ///
    /// Returns `false` if nothing was waiting for that reference.
    pub(crate) async fn resolve(&self, reference: &Reference, payload: Value) -> bool {
        let Some(tx) = self.slots.lock().await.remove(reference) else {
            return false;
        };
        if tx.send(Ok(payload)).is_err() {
            tracing::debug!(%reference, "reply arrived after its waiter gave up");
        }
        true
    }

    /// Drops the slot for `reference` without resolving it.
    pub(crate) async fn discard(&self, reference: &Reference) {
        self.slots.lock().await.remove(reference);
    }

    /// Fails every outstanding slot with [`ChannelError::ConnectionClosed`].
    ///
    /// Returns the number of slots failed.
    pub(crate) async fn fail_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.slots.lock().await);
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(ChannelError::ConnectionClosed));
        }
        count
    }

    /// Returns the number of outstanding slots.
    pub(crate) async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}
