//! In-process [`SessionStore`] and [`EventBus`] backend.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::Instant;

use crate::{
    CasOutcome, EventBus, SessionStore, StoreError, StoredValue, Subscription,
};

/// How often a write also sweeps out every expired key.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Payloads a slow subscriber may fall behind by before it misses some.
const TOPIC_CAPACITY: usize = 256;

struct Entry {
    value: StoredValue,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct Table {
    entries: HashMap<String, Entry>,
    /// When the next write sweeps the whole table.
    next_sweep: Option<Instant>,
}

impl Table {
    /// Looks up `key`, evicting it first if it has expired.
    fn live_entry(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn purge(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }

    /// Purges the whole table at most once per `interval`.
    fn sweep_if_due(&mut self, now: Instant, interval: Duration) {
        match self.next_sweep {
            Some(due) if now < due => return,
            Some(_) => {
                let purged = self.purge(now);
                if purged > 0 {
                    tracing::debug!(purged, "swept expired store entries");
                }
            }
            None => {}
        }
        self.next_sweep = Some(now + interval);
    }
}

/// A [`SessionStore`] held in this process's memory.
///
/// All keys sit behind a single mutex, and every operation, including
/// the conditional ones, does its check and its write inside one
/// critical section. That is what makes `take` and `compare_and_set`
/// atomic here.
///
/// Deadlines use `tokio::time::Instant`, so tests can drive expiry with
/// `tokio::time::pause()` / `advance()`. Expired entries are ignored on
/// access and physically removed by the next write to the same key, by
/// [`purge_expired`](Self::purge_expired), or by the sweep that `put`
/// and `compare_and_set` run once per sweep interval.
///
/// It doubles as the [`EventBus`] of a single-process deployment: each
/// topic is a `tokio::sync::broadcast` channel.
pub struct MemoryStore {
    table: Mutex<Table>,
    topics: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    sweep_interval: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            table: Mutex::new(Table::default()),
            topics: Mutex::new(HashMap::new()),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how often writes sweep out expired keys. Default: 30 s.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Drops every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let purged = self.table.lock().await.purge(now);
        if purged > 0 {
            tracing::debug!(purged, "purged expired store entries");
        }
        purged
    }

    /// Number of live (unexpired) keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.table
            .lock()
            .await
            .entries
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl SessionStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut table = self.table.lock().await;
        table.sweep_if_due(now, self.sweep_interval);
        table.entries.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let now = Instant::now();
        let mut table = self.table.lock().await;
        Ok(table.live_entry(key, now).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut table = self.table.lock().await;
        Ok(table
            .entries
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn take(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let now = Instant::now();
        let mut table = self.table.lock().await;
        Ok(table
            .entries
            .remove(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<CasOutcome, StoreError> {
        let now = Instant::now();
        let mut table = self.table.lock().await;
        table.sweep_if_due(now, self.sweep_interval);
        let Some(entry) = table.live_entry(key, now) else {
            return Ok(CasOutcome::Absent);
        };
        if entry.value.version != expected_version {
            return Ok(CasOutcome::Conflict);
        }
        entry.value = value;
        entry.expires_at = now + ttl;
        Ok(CasOutcome::Applied)
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected_version: u64,
    ) -> Result<CasOutcome, StoreError> {
        let now = Instant::now();
        let mut table = self.table.lock().await;
        let Some(entry) = table.live_entry(key, now) else {
            return Ok(CasOutcome::Absent);
        };
        if entry.value.version != expected_version {
            return Ok(CasOutcome::Conflict);
        }
        table.entries.remove(key);
        Ok(CasOutcome::Applied)
    }
}

impl EventBus for MemoryStore {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut topics = self.topics.lock().await;
        let Some(sender) = topics.get(topic) else {
            return Ok(());
        };
        if sender.send(payload).is_err() {
            // Every subscriber has gone.
            topics.remove(topic);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, StoreError> {
        let mut source = self
            .topics
            .lock()
            .await
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();

        let (tx, rx) = mpsc::unbounded_channel();
        let name = topic.to_owned();
        let forwarder = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(topic = %name, missed, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(topic, rx, forwarder))
    }
}
