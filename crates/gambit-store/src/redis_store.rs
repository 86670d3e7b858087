//! Redis-backed [`SessionStore`], shared by every server process.
//!
//! Each key is a Redis hash with two fields: `v` (the version, as a
//! decimal string) and `d` (the payload bytes). Expiry is a plain
//! `PEXPIRE` on the hash. The conditional operations run as Lua
//! scripts, which Redis executes without interleaving any other
//! command, so the read-compare-write is atomic across processes.
//!
//! Events ride on Redis pub/sub: `publish` is a plain `PUBLISH` on the
//! shared connection, and each subscription opens its own pub/sub
//! connection.

use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, Script};
use tokio::sync::mpsc;

use crate::{
    CasOutcome, EventBus, SessionStore, StoreError, StoredValue, Subscription,
};

const PUT_SCRIPT: &str = r#"
redis.call('DEL', KEYS[1])
redis.call('HSET', KEYS[1], 'v', ARGV[1], 'd', ARGV[2])
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return 1
"#;

// -1 absent, 0 conflict, 1 applied
const CAS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'v')
if not current then return -1 end
if current ~= ARGV[1] then return 0 end
redis.call('HSET', KEYS[1], 'v', ARGV[2], 'd', ARGV[3])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
return 1
"#;

const CAD_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'v')
if not current then return -1 end
if current ~= ARGV[1] then return 0 end
redis.call('DEL', KEYS[1])
return 1
"#;

const TAKE_SCRIPT: &str = r#"
local v = redis.call('HGET', KEYS[1], 'v')
if not v then return false end
local d = redis.call('HGET', KEYS[1], 'd')
redis.call('DEL', KEYS[1])
return {v, d}
"#;

/// A [`SessionStore`] over a Redis server.
///
/// Holds one multiplexed connection; each call clones the handle, which
/// shares the underlying socket.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    put: Script,
    cas: Script,
    cad: Script,
    take: Script,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        tracing::info!(url, "connected to redis store");
        Ok(Self {
            client,
            conn,
            put: Script::new(PUT_SCRIPT),
            cas: Script::new(CAS_SCRIPT),
            cad: Script::new(CAD_SCRIPT),
            take: Script::new(TAKE_SCRIPT),
        })
    }
}

fn unavailable(err: RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Redis rejects a zero expiry, so sub-millisecond TTLs round up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn cas_outcome(code: i64) -> CasOutcome {
    match code {
        1 => CasOutcome::Applied,
        0 => CasOutcome::Conflict,
        _ => CasOutcome::Absent,
    }
}

impl SessionStore for RedisStore {
    async fn put(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .put
            .key(key)
            .arg(value.version)
            .arg(value.data)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let mut conn = self.conn.clone();
        let (version, data): (Option<u64>, Option<Vec<u8>>) = redis::cmd("HMGET")
            .arg(key)
            .arg("v")
            .arg("d")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(match (version, data) {
            (Some(version), Some(data)) => Some(StoredValue { version, data }),
            _ => None,
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn take(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let mut conn = self.conn.clone();
        let taken: Option<(u64, Vec<u8>)> = self
            .take
            .key(key)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(taken.map(|(version, data)| StoredValue { version, data }))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<CasOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .cas
            .key(key)
            .arg(expected_version)
            .arg(value.version)
            .arg(value.data)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(cas_outcome(code))
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected_version: u64,
    ) -> Result<CasOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .cad
            .key(key)
            .arg(expected_version)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(cas_outcome(code))
    }
}

impl EventBus for RedisStore {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _receivers: u64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(unavailable)?;
        pubsub.subscribe(topic).await.map_err(unavailable)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let name = topic.to_owned();
        let forwarder = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                match msg.get_payload::<Vec<u8>>() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(topic = %name, error = %err, "unreadable pub/sub payload");
                    }
                }
            }
            tracing::warn!(topic = %name, "redis subscription closed");
        });
        Ok(Subscription::new(topic, rx, forwarder))
    }
}
