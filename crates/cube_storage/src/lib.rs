//! Cube storage engine: LTTLV record codec, counting Bloom filters, per-shard
//! data files and write-ahead logs, and the shard workers that serialize all
//! access to them.

pub mod bloom;
pub mod codec;
pub mod datafile;
pub mod engine;
pub mod shard;
pub mod wal;

#[cfg(test)]
mod tests;

pub use bloom::CountingBloomFilter;
pub use datafile::{DataFileStatsSnapshot, DataStore};
pub use engine::CubeEngine;
pub use shard::{SetOutcome, NIL};
pub use wal::{ShardWal, SyncMode, WalStats, WalStatsSnapshot};
