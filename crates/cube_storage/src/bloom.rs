//! Counting Bloom filter for shard read fast-rejection.
//!
//! Each shard keeps one filter over the key prefixes present in its data
//! file. A GET whose prefix is definitely absent never touches the disk.
//! Counters (rather than bits) allow `remove` without rebuilding.
//!
//! Uses double hashing (Kirsch-Mitzenmacher) over an FNV-1a base pair.
//! All cells are atomics: `contains` is safe to call concurrently with
//! `add`/`remove`, though only the owning shard worker ever mutates.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::codec::fnv1a_with_seed;

/// Default number of counter cells per filter.
pub const DEFAULT_CELLS: usize = 10_000;

/// Default number of hash functions.
pub const DEFAULT_HASHES: u32 = 3;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const SECOND_SEED: u64 = 0x517cc1b727220a95;

#[derive(Debug)]
pub struct CountingBloomFilter {
    cells: Vec<AtomicU32>,
    hash_count: u32,
}

impl CountingBloomFilter {
    /// Create a filter with `cells` counters and `hash_count` hash functions.
    /// Size and hash count are fixed at construction.
    pub fn new(cells: usize, hash_count: u32) -> Self {
        let cells = cells.max(1);
        let hash_count = hash_count.max(1);
        Self {
            cells: (0..cells).map(|_| AtomicU32::new(0)).collect(),
            hash_count,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CELLS, DEFAULT_HASHES)
    }

    /// Record one occurrence of `key`.
    pub fn add(&self, key: &str) {
        let (h1, h2) = hash_pair(key.as_bytes());
        for i in 0..self.hash_count {
            self.cells[self.cell_index(h1, h2, i)].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove one occurrence of `key`. Never underflows: a counter already at
    /// zero stays at zero.
    pub fn remove(&self, key: &str) {
        let (h1, h2) = hash_pair(key.as_bytes());
        for i in 0..self.hash_count {
            let _ = self.cells[self.cell_index(h1, h2, i)].fetch_update(
                Ordering::Relaxed,
                Ordering::Relaxed,
                |c| c.checked_sub(1),
            );
        }
    }

    /// True if `key` might be present; false means definitely absent.
    pub fn contains(&self, key: &str) -> bool {
        let (h1, h2) = hash_pair(key.as_bytes());
        (0..self.hash_count)
            .all(|i| self.cells[self.cell_index(h1, h2, i)].load(Ordering::Relaxed) > 0)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn cell_index(&self, h1: u64, h2: u64, i: u32) -> usize {
        let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (combined % self.cells.len() as u64) as usize
    }
}

fn hash_pair(key: &[u8]) -> (u64, u64) {
    (
        fnv1a_with_seed(FNV_OFFSET_BASIS, key),
        fnv1a_with_seed(SECOND_SEED, key),
    )
}
