//! Error types for `docrank`.

use std::path::PathBuf;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors returned by the `docrank` crate.
///
/// "not found" is deliberately absent: an unknown document id is a soft
/// signal expressed as `Ok(None)` / boolean returns, never an error.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A WAL group-commit batch failed to reach stable storage.
    ///
    /// Delivered to every waiter in the failed batch; the in-memory state
    /// is not mutated for any of them.
    #[error("durable i/o error: {0}")]
    DurableIo(String),

    /// Structural violation in the input (empty id, etc.), rejected before
    /// any WAL traffic.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Encoding error.
    #[error("encode error: {0}")]
    Encode(String),

    /// Decoding error.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Lock acquisition failed (concurrent access conflict).
    #[error("lock failed on {resource}: {reason}")]
    LockFailed {
        /// What we were trying to lock (file path, in-memory map, etc.).
        resource: String,
        /// Human-readable reason (poisoned lock, OS error, etc.).
        reason: String,
    },

    /// Requested path does not exist.
    #[error("missing path: {0}")]
    MissingPath(PathBuf),

    /// The engine (or its WAL) has been shut down; writes are rejected.
    #[error("engine is closed")]
    Closed,
}
