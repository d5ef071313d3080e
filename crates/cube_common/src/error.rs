use thiserror::Error;

use crate::types::{ShardId, MAX_KEY_BYTES};

/// Convenience alias for `Result<T, CubeError>`.
pub type CubeResult<T> = Result<T, CubeError>;

/// Error classification for surfacing decisions.
///
/// - `UserError`   — bad input: parse errors, transaction misuse (HTTP 400)
/// - `Transient`   — resource problems the client may retry (HTTP 500)
/// - `InternalBug` — should never happen (HTTP 500)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Transient,
    InternalBug,
}

/// Record codec errors.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Key too long ({len} > {MAX_KEY_BYTES} bytes)")]
    KeyTooLong { len: usize },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),
}

/// Storage layer errors (data files, WAL, shard workers).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shard {0} unavailable")]
    ShardUnavailable(ShardId),
}

/// Transaction manager errors.
#[derive(Error, Debug)]
pub enum TxnError {
    #[error("Already in transaction")]
    AlreadyInTransaction,

    #[error("No transaction in progress")]
    NoTransactionInProgress,

    /// Commit-time conflict: the listed keys were read during the transaction
    /// but carry a different committed value now. Keys are sorted.
    #[error("Atomicity failure ({})", .keys.join(", "))]
    AtomicityFailure { keys: Vec<String> },
}

/// Command parser errors. Display strings are the exact reasons surfaced to
/// clients after the `ERR ` prefix.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Syntax error: {0}")]
    SyntaxError(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Unclosed string literal")]
    UnclosedString,

    #[error("Unexpected trailing input '{0}'")]
    ExtraInput(String),

    #[error("Cannot SET a key to nil")]
    CannotSetNil,
}

/// Top-level error type that all layer errors convert into.
#[derive(Error, Debug)]
pub enum CubeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Txn(#[from] TxnError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CubeError {
    /// Classify this error for surfacing decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CubeError::Command(_) | CubeError::Txn(_) => ErrorKind::UserError,
            CubeError::Codec(CodecError::KeyTooLong { .. }) => ErrorKind::UserError,
            CubeError::Storage(StorageError::Codec(CodecError::KeyTooLong { .. })) => {
                ErrorKind::UserError
            }
            CubeError::Codec(CodecError::MalformedRecord(_)) => ErrorKind::InternalBug,
            CubeError::Storage(StorageError::Io(_)) => ErrorKind::Transient,
            CubeError::Storage(_) => ErrorKind::Transient,
            CubeError::Internal(_) => ErrorKind::InternalBug,
        }
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::UserError)
    }

    /// HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::UserError => 400,
            ErrorKind::Transient | ErrorKind::InternalBug => 500,
        }
    }

    /// Plain-text reply body (`ERR <reason>`).
    pub fn reply(&self) -> String {
        format!("ERR {}", self)
    }
}
