//! Log client error types.
//!
//! Errors are `Clone` so they can be queued for fault injection in tests and
//! surfaced from both the transport layer and per-partition commit responses.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LogError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LogError {
    /// A poll waited the full timeout without new data. The consumer treats
    /// this as "no more data for now", never as a failure.
    #[error("poll deadline exceeded")]
    DeadlineExceeded,

    /// The consumer group has no stored offsets yet. Lag computation treats
    /// this as "no commits", not as a failure.
    #[error("consumer group not found: {0}")]
    GroupNotFound(String),

    /// The group coordinator rejected a commit mid-rebalance. The next sweep
    /// reprocesses and retries.
    #[error("rebalance in progress")]
    RebalanceInProgress,

    #[error("unknown partition: {topic}/{partition}")]
    UnknownPartition { topic: String, partition: i32 },

    #[error("log is unreachable")]
    Unreachable,

    #[error("log client is closed")]
    Closed,
}
