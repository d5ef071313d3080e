//! Transaction manager.
//!
//! State is keyed by client name. A client has at most one open transaction;
//! operations for one client are serialized through that client's session
//! lock while different clients proceed in parallel. Without an open
//! transaction, GET and SET pass straight through to the storage engine.
//!
//! Isolation model:
//! - BEGIN captures the logical clock, anchoring the snapshot.
//! - The first read of a key fetches the value as of that snapshot and
//!   memoizes it in `reads`; later reads are served from `reads`, so the
//!   snapshot stays stable even when the version ring has moved on.
//! - Writes buffer typed values, invisible to other clients until COMMIT.
//! - COMMIT re-checks every read key against the current committed value:
//!   any mismatch aborts with the sorted conflict set (first committer wins).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

use cube_common::error::{CubeError, TxnError};
use cube_common::types::Timestamp;
use cube_common::value::Value;
use cube_storage::engine::CubeEngine;
use cube_storage::NIL;

/// An open transaction for one client.
struct OpenTxn {
    begin_ts: Timestamp,
    begun_at: Instant,
    /// Key → snapshot value observed first (canonical string).
    reads: HashMap<String, String>,
    /// Key → pending write. Typed, so commit restores the exact tag instead
    /// of re-parsing a canonical string.
    writes: HashMap<String, Value>,
}

/// Per-client state behind the session lock.
struct ClientSession {
    txn: Option<OpenTxn>,
    last_active: Instant,
}

impl ClientSession {
    fn new() -> Self {
        Self {
            txn: None,
            last_active: Instant::now(),
        }
    }

    fn has_open_txn(&self) -> bool {
        self.txn.is_some()
    }

    fn txn_age(&self) -> Option<Duration> {
        self.txn.as_ref().map(|t| t.begun_at.elapsed())
    }

    fn abandon_txn(&mut self) {
        self.txn = None;
    }
}

/// Atomic counters for transaction outcomes.
#[derive(Debug, Default)]
struct TxnStatsCollector {
    begins: AtomicU64,
    commits: AtomicU64,
    conflict_aborts: AtomicU64,
    rollbacks: AtomicU64,
    reaped: AtomicU64,
    active: AtomicU64,
}

/// Immutable snapshot of transaction statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxnStatsSnapshot {
    pub begins: u64,
    pub commits: u64,
    pub conflict_aborts: u64,
    pub rollbacks: u64,
    pub reaped: u64,
    pub active: u64,
}

impl TxnStatsCollector {
    fn snapshot(&self) -> TxnStatsSnapshot {
        TxnStatsSnapshot {
            begins: self.begins.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            conflict_aborts: self.conflict_aborts.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

pub struct TxnManager {
    engine: Arc<CubeEngine>,
    sessions: DashMap<String, Arc<Mutex<ClientSession>>>,
    stats: TxnStatsCollector,
    /// Open transactions older than this are reaped by the sweeper.
    stale_after: Duration,
}

impl TxnManager {
    pub fn new(engine: Arc<CubeEngine>) -> Self {
        Self::with_stale_timeout(engine, Duration::from_secs(3600))
    }

    pub fn with_stale_timeout(engine: Arc<CubeEngine>, stale_after: Duration) -> Self {
        Self {
            engine,
            sessions: DashMap::new(),
            stats: TxnStatsCollector::default(),
            stale_after,
        }
    }

    pub fn stats(&self) -> TxnStatsSnapshot {
        self.stats.snapshot()
    }

    /// GET for `client`: pass-through when no transaction is open; inside a
    /// transaction, writes shadow reads, reads are memoized at the snapshot.
    pub async fn get(&self, client: &str, key: &str) -> Result<String, CubeError> {
        let Some(session) = self.session(client) else {
            return Ok(self.engine.get(key).await?);
        };
        let mut session = session.lock().await;
        session.last_active = Instant::now();
        let Some(txn) = session.txn.as_mut() else {
            drop(session);
            return Ok(self.engine.get(key).await?);
        };

        if let Some(value) = txn.writes.get(key) {
            return Ok(value.canonical());
        }
        if let Some(value) = txn.reads.get(key) {
            return Ok(value.clone());
        }
        let value = self.snapshot_read(key, txn.begin_ts).await;
        txn.reads.insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// SET for `client`: pass-through when no transaction is open; inside a
    /// transaction, buffers the typed value and reports the old one.
    pub async fn set(
        &self,
        client: &str,
        key: &str,
        value: Value,
    ) -> Result<(String, String), CubeError> {
        let Some(session) = self.session(client) else {
            let outcome = self.engine.set(key, value).await?;
            return Ok((outcome.previous, outcome.current));
        };
        let mut session = session.lock().await;
        session.last_active = Instant::now();
        let Some(txn) = session.txn.as_mut() else {
            drop(session);
            let outcome = self.engine.set(key, value).await?;
            return Ok((outcome.previous, outcome.current));
        };

        let previous = if let Some(pending) = txn.writes.get(key) {
            pending.canonical()
        } else if let Some(read) = txn.reads.get(key) {
            read.clone()
        } else {
            let snapshot = self.snapshot_read(key, txn.begin_ts).await;
            txn.reads.insert(key.to_string(), snapshot.clone());
            snapshot
        };

        let current = value.canonical();
        txn.writes.insert(key.to_string(), value);
        Ok((previous, current))
    }

    pub async fn begin(&self, client: &str) -> Result<(), CubeError> {
        let session = self
            .sessions
            .entry(client.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ClientSession::new())))
            .clone();
        let mut session = session.lock().await;
        session.last_active = Instant::now();
        if session.txn.is_some() {
            return Err(TxnError::AlreadyInTransaction.into());
        }
        let begin_ts = self.engine.clock().current();
        session.txn = Some(OpenTxn {
            begin_ts,
            begun_at: Instant::now(),
            reads: HashMap::new(),
            writes: HashMap::new(),
        });
        self.stats.begins.fetch_add(1, Ordering::Relaxed);
        self.stats.active.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(client, begin_ts = %begin_ts, "transaction begun");
        Ok(())
    }

    /// COMMIT: first-committer-wins validation, then atomic apply.
    ///
    /// The transaction entry is removed whether the commit succeeds or
    /// conflicts; a conflicted client starts over with a fresh BEGIN.
    pub async fn commit(&self, client: &str) -> Result<(), CubeError> {
        let Some(session) = self.session(client) else {
            return Err(TxnError::NoTransactionInProgress.into());
        };
        let mut session = session.lock().await;
        session.last_active = Instant::now();
        let Some(txn) = session.txn.take() else {
            return Err(TxnError::NoTransactionInProgress.into());
        };
        self.stats.active.fetch_sub(1, Ordering::Relaxed);

        // Validate the read set against current committed state. Sorted for a
        // deterministic conflict report.
        let mut read_set: Vec<(&String, &String)> = txn.reads.iter().collect();
        read_set.sort_by(|(a, _), (b, _)| a.cmp(b));
        let mut conflicts = Vec::new();
        for (key, expected) in read_set {
            let current = self.engine.get(key).await?;
            if current != *expected {
                conflicts.push(key.clone());
            }
        }
        if !conflicts.is_empty() {
            self.stats.conflict_aborts.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(client, keys = ?conflicts, "commit rejected on conflict");
            return Err(TxnError::AtomicityFailure { keys: conflicts }.into());
        }

        // Apply order is not observable to other transactions: their own
        // conflict checks run against the post-apply state. Sorted anyway so
        // the on-disk outcome of a given commit is reproducible.
        let mut writes: Vec<(String, Value)> = txn.writes.into_iter().collect();
        writes.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (key, value) in writes {
            self.engine.set(&key, value).await?;
        }
        self.stats.commits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(client, begin_ts = %txn.begin_ts, "transaction committed");
        Ok(())
    }

    pub async fn rollback(&self, client: &str) -> Result<(), CubeError> {
        let Some(session) = self.session(client) else {
            return Err(TxnError::NoTransactionInProgress.into());
        };
        let mut session = session.lock().await;
        session.last_active = Instant::now();
        if session.txn.take().is_none() {
            return Err(TxnError::NoTransactionInProgress.into());
        }
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
        self.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(client, "transaction rolled back");
        Ok(())
    }

    /// Drop stale transactions (BEGIN older than `stale_after`) and prune
    /// idle empty sessions. Called by the sweeper; also directly testable.
    pub fn sweep_stale(&self) {
        let mut reaped = 0u64;
        self.sessions.retain(|client, session| {
            // A held lock means the client is mid-operation: alive, keep it.
            let Ok(mut session) = session.try_lock() else {
                return true;
            };
            if session.has_open_txn() {
                if session.txn_age().unwrap_or_default() > self.stale_after {
                    session.abandon_txn();
                    self.stats.active.fetch_sub(1, Ordering::Relaxed);
                    reaped += 1;
                    tracing::warn!(client = %client, "reaped stale transaction");
                }
                return true;
            }
            session.last_active.elapsed() <= self.stale_after
        });
        if reaped > 0 {
            self.stats.reaped.fetch_add(reaped, Ordering::Relaxed);
        }
    }

    /// Snapshot read helper: a failed read is recorded as `NIL`, keeping the
    /// read set (and thus conflict detection) total over every key touched.
    async fn snapshot_read(&self, key: &str, begin_ts: Timestamp) -> String {
        match self.engine.get_at(key, begin_ts).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "snapshot read failed, recording NIL");
                NIL.to_string()
            }
        }
    }

    fn session(&self, client: &str) -> Option<Arc<Mutex<ClientSession>>> {
        self.sessions.get(client).map(|entry| entry.clone())
    }
}
