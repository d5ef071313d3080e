//! Per-shard write-ahead log.
//!
//! One append-only file per shard, `wal_shard_{NN}.log`, one record per line.
//! `log` returns only after the bytes are synced, so the ordering
//! WAL → data file → filter-add → reply makes every acknowledged write
//! recoverable: a record logged but not applied is replayed on the next boot.
//!
//! The writer is exclusively owned by its shard worker; no locking here.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cube_common::error::StorageError;
use cube_common::types::ShardId;

/// How `log` makes a record durable before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// No sync. Tests and throwaway data only.
    None,
    /// `fsync` (data + metadata).
    #[default]
    FSync,
    /// `fdatasync` (data only).
    FDataSync,
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SyncMode::None),
            "fsync" => Ok(SyncMode::FSync),
            "fdatasync" => Ok(SyncMode::FDataSync),
            other => Err(format!(
                "invalid sync mode '{other}': expected fsync, fdatasync, or none"
            )),
        }
    }
}

/// WAL write statistics (lock-free atomics).
#[derive(Debug, Default)]
pub struct WalStats {
    records_written: AtomicU64,
    fsyncs: AtomicU64,
    fsync_total_us: AtomicU64,
    fsync_max_us: AtomicU64,
}

/// Immutable snapshot of [`WalStats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WalStatsSnapshot {
    pub records_written: u64,
    pub fsyncs: u64,
    pub fsync_total_us: u64,
    pub fsync_max_us: u64,
    pub fsync_avg_us: u64,
}

impl WalStats {
    pub fn snapshot(&self) -> WalStatsSnapshot {
        let fsyncs = self.fsyncs.load(Ordering::Relaxed);
        let total = self.fsync_total_us.load(Ordering::Relaxed);
        WalStatsSnapshot {
            records_written: self.records_written.load(Ordering::Relaxed),
            fsyncs,
            fsync_total_us: total,
            fsync_max_us: self.fsync_max_us.load(Ordering::Relaxed),
            fsync_avg_us: if fsyncs > 0 { total / fsyncs } else { 0 },
        }
    }

    fn record_fsync(&self, latency_us: u64) {
        self.fsyncs.fetch_add(1, Ordering::Relaxed);
        self.fsync_total_us.fetch_add(latency_us, Ordering::Relaxed);
        // Update max via CAS loop
        let mut current_max = self.fsync_max_us.load(Ordering::Relaxed);
        while latency_us > current_max {
            match self.fsync_max_us.compare_exchange_weak(
                current_max,
                latency_us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_max = actual,
            }
        }
    }
}

/// Append-and-sync log for one shard.
#[derive(Debug)]
pub struct ShardWal {
    path: PathBuf,
    sync_mode: SyncMode,
    file: Option<File>,
    stats: Arc<WalStats>,
}

impl ShardWal {
    pub fn open(dir: &Path, shard: ShardId, sync_mode: SyncMode, stats: Arc<WalStats>) -> Self {
        Self {
            path: dir.join(format!("wal_shard_{}.log", shard.label())),
            sync_mode,
            file: None,
            stats,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and sync. Returns only after the sync completes.
    pub fn log(&mut self, record: &str) -> Result<(), StorageError> {
        let record = record.trim_end_matches('\n');
        let sync_mode = self.sync_mode;
        let file = self.ensure_open()?;
        file.write_all(record.as_bytes())?;
        file.write_all(b"\n")?;

        match sync_mode {
            SyncMode::None => {}
            SyncMode::FSync | SyncMode::FDataSync => {
                let start = Instant::now();
                if sync_mode == SyncMode::FSync {
                    file.sync_all()?;
                } else {
                    file.sync_data()?;
                }
                self.stats
                    .record_fsync(start.elapsed().as_micros() as u64);
            }
        }
        self.stats.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// All pending records, in append order, trimmed; empty lines dropped.
    /// Empty when the file is absent.
    pub fn replay(&self) -> Result<Vec<String>, StorageError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Delete the log. Every record in it has been applied to the data file.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.file = None;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn ensure_open(&mut self) -> Result<&mut File, StorageError> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(StorageError::Io(std::io::Error::other("WAL handle lost"))),
        }
    }
}
