pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::CubeConfig;
pub use error::{CubeError, CubeResult, ErrorKind};
pub use types::{LogicalClock, ShardId, Timestamp, MAX_KEY_BYTES, SHARD_COUNT};
pub use value::Value;
