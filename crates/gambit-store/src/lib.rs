//! Shared, expiring key-value store with atomic conditional writes.
//!
//! Every piece of authoritative match state lives behind the
//! [`SessionStore`] trait, so any number of server processes can serve
//! the same session. The contract is deliberately narrow:
//!
//! - plain `put` / `get` / `delete` with a per-key TTL,
//! - `take` (read and delete in one step) for single-use values,
//! - `compare_and_set` / `compare_and_delete` guarded by a version
//!   number that travels beside the opaque payload.
//!
//! # Backends
//!
//! - [`MemoryStore`] — one process, one mutex. Used by tests and by
//!   single-node deployments; events go through `tokio::sync::broadcast`.
//! - [`RedisStore`] (feature `redis`) — shared across processes; the
//!   conditional operations are single Lua scripts and events use
//!   `PUBLISH` / `SUBSCRIBE`.
//! - [`BoundedStore`] — wraps either of the above and puts a deadline on
//!   every call.
//!
//! # Expiry
//!
//! An expired key is indistinguishable from a key that was never
//! written: `get` returns `None`, and a conditional write reports
//! [`CasOutcome::Absent`]. Nothing ever brings an expired value back.
//!
//! # Events
//!
//! Beside the keys, every backend is also an [`EventBus`]: named topics
//! that carry commit notifications from the process that wrote a record
//! to every process with connections watching it.

mod bounded;
mod bus;
mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use bounded::BoundedStore;
pub use bus::{EventBus, Subscription};
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

// ---------------------------------------------------------------------------
// Values and outcomes
// ---------------------------------------------------------------------------

/// A stored payload and the version it was written at.
///
/// The store never looks inside `data`; conditional writes compare
/// `version` only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub version: u64,
    pub data: Vec<u8>,
}

impl StoredValue {
    pub fn new(version: u64, data: Vec<u8>) -> Self {
        Self { version, data }
    }
}

/// Result of a version-guarded write or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored version matched; the write took effect.
    Applied,
    /// The key exists at a different version; nothing changed.
    Conflict,
    /// The key does not exist (never written, deleted, or expired).
    Absent,
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Async key-value store with TTLs and atomic conditional writes.
///
/// Every method is a single atomic step against the backend: no caller
/// can observe, or interleave with, half of one.
pub trait SessionStore: Send + Sync + 'static {
    /// Writes `value` under `key` unconditionally, replacing any previous
    /// value and resetting the TTL.
    fn put(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Reads the current value, if present and not expired.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<StoredValue>, StoreError>> + Send;

    /// Removes `key`. Returns `true` if a live value was removed.
    fn delete(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Reads and removes `key` in one step.
    ///
    /// When several callers race, at most one of them gets `Some`.
    fn take(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<StoredValue>, StoreError>> + Send;

    /// Replaces the value only if the stored version equals
    /// `expected_version`. On success the TTL is reset to `ttl`.
    fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        value: StoredValue,
        ttl: Duration,
    ) -> impl Future<Output = Result<CasOutcome, StoreError>> + Send;

    /// Removes `key` only if the stored version equals `expected_version`.
    fn compare_and_delete(
        &self,
        key: &str,
        expected_version: u64,
    ) -> impl Future<Output = Result<CasOutcome, StoreError>> + Send;
}

/// A shared store is still a store; several servers in one process can
/// hold the same backend.
impl<S: SessionStore> SessionStore for Arc<S> {
    async fn put(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        (**self).put(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key).await
    }

    async fn take(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        (**self).take(key).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<CasOutcome, StoreError> {
        (**self)
            .compare_and_set(key, expected_version, value, ttl)
            .await
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected_version: u64,
    ) -> Result<CasOutcome, StoreError> {
        (**self).compare_and_delete(key, expected_version).await
    }
}
