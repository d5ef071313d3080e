//! Shard worker: the single owner of one shard's filter, WAL, data file, and
//! version ring.
//!
//! Every operation for a shard flows through its worker's mailbox, giving
//! per-shard single-writer serialization without any file-level locking. The
//! worker runs on a dedicated OS thread (file I/O and fsync block), while
//! callers are async: they send a request over a bounded `mpsc` channel and
//! await a `oneshot` reply.
//!
//! Write ordering per operation: WAL append+fsync → data-file update →
//! filter add → reply. If the WAL or data-file step fails, the filter is not
//! touched and the error propagates; a WAL record without a data-file apply
//! is redone by replay on the next boot.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use cube_common::error::StorageError;
use cube_common::types::{LogicalClock, ShardId, Timestamp};
use cube_common::value::Value;

use crate::bloom::CountingBloomFilter;
use crate::codec;
use crate::datafile::DataStore;
use crate::wal::ShardWal;

/// Canonical reply for an absent key.
pub const NIL: &str = "NIL";

/// Versions retained per key in the in-memory ring.
const VERSION_RING_CAPACITY: usize = 100;

/// Mailbox depth per shard; senders back off when the worker falls behind.
const MAILBOX_DEPTH: usize = 128;

/// Result of a SET: the value the key held before, and the one it holds now
/// (both canonical strings; `NIL` when previously absent).
#[derive(Debug, Clone)]
pub struct SetOutcome {
    pub previous: String,
    pub current: String,
}

enum ShardRequest {
    Get {
        key: String,
        snapshot: Option<Timestamp>,
        reply: oneshot::Sender<Result<String, StorageError>>,
    },
    Set {
        key: String,
        value: Value,
        reply: oneshot::Sender<Result<SetOutcome, StorageError>>,
    },
}

/// Async handle to one shard worker.
pub struct ShardHandle {
    shard: ShardId,
    tx: Mutex<Option<mpsc::Sender<ShardRequest>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ShardHandle {
    /// Read a key. With `snapshot`, the worker consults its version ring for
    /// the newest entry at or before the timestamp before falling back to the
    /// data file.
    pub async fn get(
        &self,
        key: &str,
        snapshot: Option<Timestamp>,
    ) -> Result<String, StorageError> {
        let (reply, rx) = oneshot::channel();
        self.sender()?
            .send(ShardRequest::Get {
                key: key.to_string(),
                snapshot,
                reply,
            })
            .await
            .map_err(|_| StorageError::ShardUnavailable(self.shard))?;
        rx.await
            .map_err(|_| StorageError::ShardUnavailable(self.shard))?
    }

    /// Durably write a key, returning the previous and new canonical values.
    pub async fn set(&self, key: &str, value: Value) -> Result<SetOutcome, StorageError> {
        let (reply, rx) = oneshot::channel();
        self.sender()?
            .send(ShardRequest::Set {
                key: key.to_string(),
                value,
                reply,
            })
            .await
            .map_err(|_| StorageError::ShardUnavailable(self.shard))?;
        rx.await
            .map_err(|_| StorageError::ShardUnavailable(self.shard))?
    }

    /// Close the mailbox and join the worker thread. In-flight requests are
    /// drained first; later sends fail with `ShardUnavailable`. Idempotent.
    pub fn shutdown(&self) {
        drop(self.tx.lock().take());
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!(shard = %self.shard, "shard worker panicked");
            }
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<ShardRequest>, StorageError> {
        self.tx
            .lock()
            .clone()
            .ok_or(StorageError::ShardUnavailable(self.shard))
    }
}

/// Boot one shard and spawn its worker thread.
///
/// Boot is synchronous and runs on the caller: WAL replay feeds pending
/// records through the data file, the WAL is cleared, and the Bloom filter is
/// warmed from the surviving lines. Errors here fail the whole engine open.
pub fn spawn_shard(
    shard: ShardId,
    store: Arc<DataStore>,
    mut wal: ShardWal,
    clock: Arc<LogicalClock>,
    filter_cells: usize,
    filter_hashes: u32,
) -> Result<ShardHandle, StorageError> {
    let filter = Arc::new(CountingBloomFilter::new(filter_cells, filter_hashes));

    let replayed = wal.replay()?;
    if !replayed.is_empty() {
        tracing::info!(shard = %shard, records = replayed.len(), "replaying WAL");
    }
    for record in &replayed {
        match codec::extract_key_prefix(record) {
            Ok(prefix) => {
                let prefix = prefix.to_string();
                store.update_or_append(shard, record, &prefix)?;
            }
            Err(e) => {
                tracing::warn!(shard = %shard, error = %e, "skipping unparseable WAL record");
            }
        }
    }
    wal.clear()?;

    let mut warmed = 0usize;
    for line in store.stream_lines(shard)? {
        let line = line?;
        match codec::extract_key_prefix(line.trim_end()) {
            Ok(prefix) => {
                filter.add(prefix);
                warmed += 1;
            }
            Err(e) => {
                tracing::warn!(shard = %shard, error = %e, "skipping corrupt data line in warm-up");
            }
        }
    }
    tracing::debug!(shard = %shard, keys = warmed, "bloom filter warmed");

    let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
    let worker = ShardWorker {
        shard,
        filter,
        store,
        wal,
        clock,
        versions: HashMap::new(),
        wal_pending_redo: false,
    };
    let thread = std::thread::Builder::new()
        .name(format!("cube-shard-{shard}"))
        .spawn(move || worker.run(rx))
        .map_err(StorageError::Io)?;

    Ok(ShardHandle {
        shard,
        tx: Mutex::new(Some(tx)),
        thread: Mutex::new(Some(thread)),
    })
}

struct ShardWorker {
    shard: ShardId,
    filter: Arc<CountingBloomFilter>,
    store: Arc<DataStore>,
    wal: ShardWal,
    clock: Arc<LogicalClock>,
    /// Recent committed versions per key, oldest first.
    versions: HashMap<String, VecDeque<(Timestamp, String)>>,
    /// True once a record reached the WAL but failed to apply to the data
    /// file. The WAL must then survive shutdown so boot replay redoes it.
    wal_pending_redo: bool,
}

impl ShardWorker {
    fn run(mut self, mut rx: mpsc::Receiver<ShardRequest>) {
        while let Some(request) = rx.blocking_recv() {
            match request {
                ShardRequest::Get {
                    key,
                    snapshot,
                    reply,
                } => {
                    let _ = reply.send(self.get(&key, snapshot));
                }
                ShardRequest::Set { key, value, reply } => {
                    let _ = reply.send(self.set(&key, &value));
                }
            }
        }
        // Clean shutdown: every logged record was applied, so the WAL holds
        // nothing to redo and the on-disk contract is "no WAL files".
        if self.wal_pending_redo {
            tracing::warn!(shard = %self.shard, "keeping WAL for boot-time redo");
        } else if let Err(e) = self.wal.clear() {
            tracing::warn!(shard = %self.shard, error = %e, "failed to clear WAL on shutdown");
        }
        tracing::debug!(shard = %self.shard, "shard worker stopped");
    }

    fn get(&self, key: &str, snapshot: Option<Timestamp>) -> Result<String, StorageError> {
        let enc = codec::encode_get(key)?;

        if let Some(ts) = snapshot {
            if let Some(chain) = self.versions.get(key) {
                if let Some((_, value)) = chain.iter().rev().find(|(vts, _)| *vts <= ts) {
                    return Ok(value.clone());
                }
            }
            // No ring entry old enough: fall through to the current on-disk
            // state, which the caller's read memoization then pins.
        }

        self.read_current(&enc.prefix)
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<SetOutcome, StorageError> {
        let enc = codec::encode_set(key, value)?;
        let prefix = codec::extract_key_prefix(&enc.record)
            .map_err(StorageError::Codec)?
            .to_string();
        let current = value.canonical();

        // The old value must be read before the write becomes visible.
        let previous = self.read_current(&prefix)?;

        self.wal.log(&enc.record)?;
        if let Err(e) = self.store.update_or_append(self.shard, &enc.record, &prefix) {
            self.wal_pending_redo = true;
            return Err(e);
        }
        self.filter.add(&prefix);

        let ts = self.clock.next();
        let chain = self.versions.entry(key.to_string()).or_default();
        chain.push_back((ts, current.clone()));
        if chain.len() > VERSION_RING_CAPACITY {
            chain.pop_front();
        }

        Ok(SetOutcome { previous, current })
    }

    /// Current committed value for a key prefix: filter fast-reject, then
    /// last matching line, then decode. A corrupt record reads as absent.
    fn read_current(&self, prefix: &str) -> Result<String, StorageError> {
        if !self.filter.contains(prefix) {
            return Ok(NIL.to_string());
        }
        match self.store.read_line_by_prefix(self.shard, prefix)? {
            None => Ok(NIL.to_string()),
            Some(line) => match codec::decode(&line) {
                Ok(value) => Ok(value),
                Err(e) => {
                    tracing::warn!(shard = %self.shard, error = %e, "corrupt record, treating key as absent");
                    Ok(NIL.to_string())
                }
            },
        }
    }
}
