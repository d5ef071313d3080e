use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CubeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub wal: WalConfig,
    #[serde(default)]
    pub txn: TxnConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub listen_addr: String,
    /// Graceful shutdown drain timeout in seconds.
    /// After SIGINT/SIGTERM, the server waits up to this many seconds for
    /// in-flight requests to finish before forcing exit.
    #[serde(default = "default_shutdown_drain_timeout_secs")]
    pub shutdown_drain_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4000".to_string(),
            shutdown_drain_timeout_secs: default_shutdown_drain_timeout_secs(),
        }
    }
}

fn default_shutdown_drain_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding shard data files and WALs.
    pub data_dir: String,
    /// Bloom filter cells per shard.
    #[serde(default = "default_bloom_cells")]
    pub bloom_cells: usize,
    /// Bloom filter hash functions per shard.
    #[serde(default = "default_bloom_hashes")]
    pub bloom_hashes: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: ".".to_string(),
            bloom_cells: default_bloom_cells(),
            bloom_hashes: default_bloom_hashes(),
        }
    }
}

fn default_bloom_cells() -> usize {
    10_000
}

fn default_bloom_hashes() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Sync mode: "fsync", "fdatasync", or "none".
    ///
    /// "none" drops the per-record durability guarantee and exists for tests
    /// and throwaway deployments only.
    pub sync_mode: String,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            sync_mode: "fsync".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnConfig {
    /// Interval between stale-transaction sweeps in seconds.
    pub sweep_interval_secs: u64,
    /// Age after which an open transaction is reaped, in seconds.
    pub stale_txn_timeout_secs: u64,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            stale_txn_timeout_secs: 3600,
        }
    }
}
