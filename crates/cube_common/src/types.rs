use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Number of shards. Fixed by on-disk compatibility: shard assignment is
/// `hash(key_hex) % SHARD_COUNT`, so changing this breaks existing data files.
pub const SHARD_COUNT: usize = 20;

/// Maximum key length in bytes.
pub const MAX_KEY_BYTES: usize = 512;

/// Identifier of one shard, in `0..SHARD_COUNT`.
///
/// Renders as the two-digit decimal label used in file names (`"00".."19"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub usize);

impl ShardId {
    /// All shard ids in ascending order.
    pub fn all() -> impl Iterator<Item = ShardId> {
        (0..SHARD_COUNT).map(ShardId)
    }

    /// Two-digit file-name label.
    pub fn label(&self) -> String {
        format!("{:02}", self.0)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// Logical timestamp drawn from a [`LogicalClock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic logical clock shared by the storage engine and the transaction
/// manager.
///
/// `next()` allocates a fresh timestamp strictly greater than every timestamp
/// returned before it; `current()` returns the last allocated timestamp. A
/// transaction's BEGIN captures `current()`, so every write committed after
/// BEGIN carries a timestamp strictly greater than the snapshot.
#[derive(Debug, Default)]
pub struct LogicalClock {
    counter: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Allocate the next timestamp.
    pub fn next(&self) -> Timestamp {
        Timestamp(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Last allocated timestamp without advancing.
    pub fn current(&self) -> Timestamp {
        Timestamp(self.counter.load(Ordering::SeqCst))
    }
}
