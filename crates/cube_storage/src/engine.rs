//! The Cube storage engine: routing facade over the 20 shard workers.
//!
//! `open` creates the data directory, boots every shard (WAL replay, filter
//! warm-up), and spawns the worker threads. `get`/`set` hash the key onto its
//! shard and forward to that worker's mailbox; the engine itself holds no
//! per-key state.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use cube_common::config::CubeConfig;
use cube_common::error::StorageError;
use cube_common::types::{LogicalClock, ShardId, Timestamp};
use cube_common::value::Value;

use crate::codec;
use crate::datafile::{DataFileStatsSnapshot, DataStore};
use crate::shard::{spawn_shard, SetOutcome, ShardHandle};
use crate::wal::{ShardWal, SyncMode, WalStats, WalStatsSnapshot};

pub struct CubeEngine {
    shards: Vec<ShardHandle>,
    store: Arc<DataStore>,
    wal_stats: Arc<WalStats>,
    clock: Arc<LogicalClock>,
    data_dir: PathBuf,
}

impl CubeEngine {
    /// Open the engine: create the data directory if needed, then boot and
    /// spawn all shards. Recovery (WAL replay) happens per shard before its
    /// worker accepts any request.
    pub fn open(config: &CubeConfig) -> Result<Self, StorageError> {
        let data_dir = PathBuf::from(&config.storage.data_dir);
        fs::create_dir_all(&data_dir)?;

        let sync_mode = SyncMode::from_str(&config.wal.sync_mode).map_err(|e| {
            StorageError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let store = Arc::new(DataStore::new(&data_dir));
        let wal_stats = Arc::new(WalStats::default());
        let clock = Arc::new(LogicalClock::new());

        let mut shards = Vec::with_capacity(cube_common::SHARD_COUNT);
        for shard in ShardId::all() {
            let wal = ShardWal::open(&data_dir, shard, sync_mode, wal_stats.clone());
            shards.push(spawn_shard(
                shard,
                store.clone(),
                wal,
                clock.clone(),
                config.storage.bloom_cells,
                config.storage.bloom_hashes,
            )?);
        }
        tracing::info!(data_dir = %data_dir.display(), shards = shards.len(), "storage engine open");

        Ok(Self {
            shards,
            store,
            wal_stats,
            clock,
            data_dir,
        })
    }

    /// Current committed value for `key` (`NIL` when absent).
    pub async fn get(&self, key: &str) -> Result<String, StorageError> {
        self.route(key)?.get(key, None).await
    }

    /// Value of `key` as of `snapshot`, served from the owning shard's
    /// version ring when possible.
    pub async fn get_at(&self, key: &str, snapshot: Timestamp) -> Result<String, StorageError> {
        self.route(key)?.get(key, Some(snapshot)).await
    }

    /// Durably write `key`, returning the previous and new canonical values.
    pub async fn set(&self, key: &str, value: Value) -> Result<SetOutcome, StorageError> {
        self.route(key)?.set(key, value).await
    }

    /// The logical clock shared with the transaction manager.
    pub fn clock(&self) -> Arc<LogicalClock> {
        self.clock.clone()
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    pub fn data_stats(&self) -> DataFileStatsSnapshot {
        self.store.stats()
    }

    pub fn wal_stats(&self) -> WalStatsSnapshot {
        self.wal_stats.snapshot()
    }

    /// Drain and stop every shard worker. Further operations fail with
    /// `ShardUnavailable`.
    pub fn shutdown(&self) {
        for shard in &self.shards {
            shard.shutdown();
        }
        tracing::info!("storage engine stopped");
    }

    fn route(&self, key: &str) -> Result<&ShardHandle, StorageError> {
        let enc = codec::encode_get(key)?;
        Ok(&self.shards[enc.shard.0])
    }
}

impl Drop for CubeEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
