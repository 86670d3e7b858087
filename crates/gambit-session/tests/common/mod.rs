//! Test doubles shared by the session integration suites.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use gambit_protocol::{Participant, PlayerId, SessionRecord};
use gambit_session::{
    MatchConfig, MoveOracle, OracleRejection, Outcome, SessionService, Verdict,
};
use gambit_store::{
    CasOutcome, MemoryStore, SessionStore, StoreError, StoredValue,
};

// =========================================================================
// Participants
// =========================================================================

pub fn alice() -> Participant {
    Participant::new(PlayerId(1), "alice")
}

pub fn bob() -> Participant {
    Participant::new(PlayerId(2), "bob")
}

pub fn carol() -> Participant {
    Participant::new(PlayerId(3), "carol")
}

pub fn memory_service() -> SessionService<MemoryStore> {
    SessionService::new(MemoryStore::new(), MatchConfig::default())
}

/// Creates a session as alice and seats bob.
pub async fn active_session<S: SessionStore>(
    service: &SessionService<S>,
) -> SessionRecord {
    let (record, ticket) = service.create_session(alice()).await.unwrap();
    service
        .join_session(&record.session_id, &ticket.ticket_id, bob())
        .await
        .unwrap()
}

// =========================================================================
// TestOracle
// =========================================================================

/// A stand-in for a chess engine.
///
/// Accepts any `[a-h][1-8][a-h][1-8]` move unless told otherwise; the
/// "position" after a move is the old one with the move appended, so
/// tests can see exactly which moves were committed.
#[derive(Default)]
pub struct TestOracle {
    illegal: HashSet<String>,
    endings: HashMap<String, Outcome>,
    checks: HashSet<String>,
}

impl TestOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn illegal(mut self, notation: &str) -> Self {
        self.illegal.insert(notation.to_owned());
        self
    }

    pub fn ending(mut self, notation: &str, outcome: Outcome) -> Self {
        self.endings.insert(notation.to_owned(), outcome);
        self
    }

    pub fn checking(mut self, notation: &str) -> Self {
        self.checks.insert(notation.to_owned());
        self
    }
}

fn well_formed(notation: &str) -> bool {
    let b = notation.as_bytes();
    b.len() == 4
        && (b'a'..=b'h').contains(&b[0])
        && (b'1'..=b'8').contains(&b[1])
        && (b'a'..=b'h').contains(&b[2])
        && (b'1'..=b'8').contains(&b[3])
}

impl MoveOracle for TestOracle {
    fn evaluate(
        &self,
        position: &str,
        notation: &str,
    ) -> Result<Verdict, OracleRejection> {
        if !well_formed(notation) {
            return Err(OracleRejection::Malformed);
        }
        if self.illegal.contains(notation) {
            return Err(OracleRejection::Illegal);
        }
        Ok(Verdict {
            position: format!("{position} {notation}"),
            check: self.checks.contains(notation),
            outcome: self
                .endings
                .get(notation)
                .copied()
                .unwrap_or(Outcome::Ongoing),
        })
    }
}

// =========================================================================
// MeddlingStore
// =========================================================================

/// Wraps a [`MemoryStore`] and, just before the next `meddles`
/// compare-and-sets, rewrites the target record at `version + 1` as if
/// another process had committed first.
pub struct MeddlingStore {
    inner: MemoryStore,
    meddles: AtomicU32,
}

impl MeddlingStore {
    pub fn new(meddles: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            meddles: AtomicU32::new(meddles),
        }
    }

    /// Schedules `meddles` more foreign writes.
    pub fn arm(&self, meddles: u32) {
        self.meddles.store(meddles, Ordering::SeqCst);
    }

    async fn meddle(&self, key: &str) {
        let remaining = self.meddles.load(Ordering::SeqCst);
        if remaining == 0 {
            return;
        }
        self.meddles.store(remaining - 1, Ordering::SeqCst);

        let Some(current) = self.inner.get(key).await.unwrap() else {
            return;
        };
        let mut record: SessionRecord =
            serde_json::from_slice(&current.data).unwrap();
        record.version += 1;
        let data = serde_json::to_vec(&record).unwrap();
        self.inner
            .put(
                key,
                StoredValue::new(record.version, data),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();
    }
}

impl SessionStore for MeddlingStore {
    async fn put(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.inner.put(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }

    async fn take(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        self.inner.take(key).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        value: StoredValue,
        ttl: Duration,
    ) -> Result<CasOutcome, StoreError> {
        self.meddle(key).await;
        self.inner
            .compare_and_set(key, expected_version, value, ttl)
            .await
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected_version: u64,
    ) -> Result<CasOutcome, StoreError> {
        self.inner.compare_and_delete(key, expected_version).await
    }
}

// =========================================================================
// DownStore
// =========================================================================

/// A store that is never reachable.
pub struct DownStore;

fn down<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("connection refused".into()))
}

impl SessionStore for DownStore {
    async fn put(
        &self,
        _key: &str,
        _value: StoredValue,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        down()
    }

    async fn get(&self, _key: &str) -> Result<Option<StoredValue>, StoreError> {
        down()
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        down()
    }

    async fn take(&self, _key: &str) -> Result<Option<StoredValue>, StoreError> {
        down()
    }

    async fn compare_and_set(
        &self,
        _key: &str,
        _expected_version: u64,
        _value: StoredValue,
        _ttl: Duration,
    ) -> Result<CasOutcome, StoreError> {
        down()
    }

    async fn compare_and_delete(
        &self,
        _key: &str,
        _expected_version: u64,
    ) -> Result<CasOutcome, StoreError> {
        down()
    }
}
