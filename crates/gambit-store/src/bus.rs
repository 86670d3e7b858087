//! Cross-process event bus that sits beside the store.
//!
//! A commit on one server process has to reach connections held by every
//! other process serving the same session. Publishers hand an opaque
//! payload to a named topic; every live [`Subscription`] on that topic,
//! in any process sharing the backend, receives it.
//!
//! Delivery is at-most-once: a subscriber that is not yet subscribed, or
//! falls too far behind, misses payloads. Consumers that need ordering
//! carry their own sequence numbers inside the payload.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::StoreError;

/// Publish/subscribe on named topics.
pub trait EventBus: Send + Sync + 'static {
    /// Sends `payload` to every current subscriber of `topic`. Having no
    /// subscribers is not an error.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Starts receiving payloads published to `topic` from now on.
    ///
    /// The subscription is active once this returns: anything published
    /// afterwards is delivered to it.
    fn subscribe(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Subscription, StoreError>> + Send;
}

impl<B: EventBus> EventBus for Arc<B> {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<(), StoreError> {
        (**self).publish(topic, payload).await
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, StoreError> {
        (**self).subscribe(topic).await
    }
}

/// A live subscription to one topic.
///
/// A forwarding task owned by the backend feeds it; dropping the
/// subscription stops that task.
pub struct Subscription {
    topic: String,
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    forwarder: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(
        topic: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Vec<u8>>,
        forwarder: JoinHandle<()>,
    ) -> Self {
        Self {
            topic: topic.into(),
            receiver,
            forwarder,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The next payload, or `None` once the backend has stopped feeding
    /// this subscription.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
