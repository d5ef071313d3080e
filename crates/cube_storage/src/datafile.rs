//! Per-shard data files.
//!
//! Each shard owns one human-readable text file, `shard_{NN}_data.txt`, with
//! one record per line. The file is append-biased: a new key appends, an
//! existing key is rewritten in place through a sibling temp file and an
//! atomic rename. Readers honor "last matching line wins" so a file caught
//! mid-rewrite still yields the newest record.
//!
//! Concurrent callers on the same shard are serialized by the shard worker;
//! this layer takes no locks.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use cube_common::error::StorageError;
use cube_common::types::ShardId;

/// Data file access counters (lock-free atomics).
#[derive(Debug, Default)]
pub struct DataFileStats {
    /// Lookup calls that consulted a data file (the Bloom filter's job is to
    /// keep this from moving on misses).
    pub(crate) reads: AtomicU64,
    pub(crate) appends: AtomicU64,
    pub(crate) rewrites: AtomicU64,
    pub(crate) corrupt_lines: AtomicU64,
}

/// Immutable snapshot of [`DataFileStats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DataFileStatsSnapshot {
    pub reads: u64,
    pub appends: u64,
    pub rewrites: u64,
    pub corrupt_lines: u64,
}

impl DataFileStats {
    pub fn snapshot(&self) -> DataFileStatsSnapshot {
        DataFileStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            appends: self.appends.load(Ordering::Relaxed),
            rewrites: self.rewrites.load(Ordering::Relaxed),
            corrupt_lines: self.corrupt_lines.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the data directory holding every shard's file.
#[derive(Debug)]
pub struct DataStore {
    dir: PathBuf,
    stats: DataFileStats,
}

impl DataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stats: DataFileStats::default(),
        }
    }

    pub fn path_for(&self, shard: ShardId) -> PathBuf {
        self.dir.join(format!("shard_{}_data.txt", shard.label()))
    }

    pub fn exists(&self, shard: ShardId) -> bool {
        self.path_for(shard).exists()
    }

    pub fn stats(&self) -> DataFileStatsSnapshot {
        self.stats.snapshot()
    }

    /// Append a record unconditionally. The primary write path is
    /// [`DataStore::update_or_append`]; this is the raw building block.
    pub fn append(&self, shard: ShardId, record: &str) -> Result<(), StorageError> {
        let record = record.trim_end_matches('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(shard))?;
        file.write_all(record.as_bytes())?;
        file.write_all(b"\n")?;
        self.stats.appends.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Write `record` for the key identified by `key_prefix`: replace the
    /// first line carrying that prefix, or append when none does.
    ///
    /// The replace path writes the whole new content to a sibling temp file
    /// and renames it over the original, so a crash leaves either the old
    /// file or the new one, never a torn mix.
    pub fn update_or_append(
        &self,
        shard: ShardId,
        record: &str,
        key_prefix: &str,
    ) -> Result<(), StorageError> {
        let record = record.trim_end_matches('\n');
        let path = self.path_for(shard);
        if !path.exists() {
            return self.append(shard, record);
        }

        let mut lines: Vec<Vec<u8>> = Vec::new();
        let mut replaced = false;
        for line in raw_lines(File::open(&path)?) {
            let line = line?;
            if !replaced && line.starts_with(key_prefix.as_bytes()) {
                lines.push(record.as_bytes().to_vec());
                replaced = true;
            } else {
                lines.push(line);
            }
        }

        if !replaced {
            return self.append(shard, record);
        }

        let tmp_path = sibling_tmp_path(&path);
        {
            let mut tmp = File::create(&tmp_path)?;
            for line in &lines {
                tmp.write_all(line)?;
                tmp.write_all(b"\n")?;
            }
            tmp.sync_data()?;
        }
        fs::rename(&tmp_path, &path)?;
        self.stats.rewrites.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Return the **last** line starting with `prefix`, trimmed of its
    /// newline, or `None`. Lines that are not valid UTF-8 are skipped and
    /// counted, never fatal.
    pub fn read_line_by_prefix(
        &self,
        shard: ShardId,
        prefix: &str,
    ) -> Result<Option<String>, StorageError> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        let path = self.path_for(shard);
        if !path.exists() {
            return Ok(None);
        }

        let mut last: Option<String> = None;
        for line in raw_lines(File::open(&path)?) {
            let line = line?;
            if !line.starts_with(prefix.as_bytes()) {
                continue;
            }
            match String::from_utf8(line) {
                Ok(text) => last = Some(text),
                Err(_) => {
                    self.stats.corrupt_lines.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(last)
    }

    /// Lazily iterate the shard's lines for filter warm-up. Empty when the
    /// file is absent. Lines that are not valid UTF-8 are skipped and counted
    /// as corrupt.
    pub fn stream_lines(
        &self,
        shard: ShardId,
    ) -> Result<impl Iterator<Item = io::Result<String>> + '_, StorageError> {
        let path = self.path_for(shard);
        let file = if path.exists() {
            Some(File::open(&path)?)
        } else {
            None
        };
        let stats = &self.stats;
        Ok(file
            .into_iter()
            .flat_map(raw_lines)
            .filter_map(move |line| match line {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        stats.corrupt_lines.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            }))
    }
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Iterate raw `\n`-terminated lines as byte vectors, newline stripped.
/// Unlike `BufRead::lines`, invalid UTF-8 does not abort the scan.
fn raw_lines(file: File) -> impl Iterator<Item = io::Result<Vec<u8>>> {
    let mut reader = BufReader::new(file);
    std::iter::from_fn(move || {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                Some(Ok(buf))
            }
            Err(e) => Some(Err(e)),
        }
    })
}
