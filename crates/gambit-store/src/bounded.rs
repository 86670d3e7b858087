//! Deadline wrapper for any [`SessionStore`].

use std::future::Future;
use std::time::Duration;

use crate::{
    CasOutcome, EventBus, SessionStore, StoreError, StoredValue, Subscription,
};

/// Wraps a store so that no call waits longer than `limit`.
///
/// A call that runs out of time returns [`StoreError::Timeout`]. The
/// inner future is dropped at that point; for a conditional write this
/// means the caller cannot tell whether it landed, which is why the
/// session layer treats a timeout as "unavailable, try again" rather
/// than as a conflict.
pub struct BoundedStore<S> {
    inner: S,
    limit: Duration,
}

impl<S> BoundedStore<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, limit = ?self.limit, "store call timed out");
                Err(StoreError::Timeout(self.limit))
            }
        }
    }
}

impl<S: SessionStore> SessionStore for BoundedStore<S> {
    async fn put(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.bounded("put", self.inner.put(key, value, ttl)).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        self.bounded("get", self.inner.get(key)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.bounded("delete", self.inner.delete(key)).await
    }

    async fn take(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        self.bounded("take", self.inner.take(key)).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<CasOutcome, StoreError> {
        self.bounded(
            "compare_and_set",
            self.inner.compare_and_set(key, expected_version, value, ttl),
        )
        .await
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected_version: u64,
    ) -> Result<CasOutcome, StoreError> {
        self.bounded(
            "compare_and_delete",
            self.inner.compare_and_delete(key, expected_version),
        )
        .await
    }
}

impl<S: EventBus> EventBus for BoundedStore<S> {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.bounded("publish", self.inner.publish(topic, payload)).await
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, StoreError> {
        self.bounded("subscribe", self.inner.subscribe(topic)).await
    }
}
