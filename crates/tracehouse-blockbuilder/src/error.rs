//! Block-builder error taxonomy.
//!
//! Startup variants are fatal; the service never enters running. Everything
//! else is a per-partition cycle abort: the cycle driver logs it and the
//! next sweep retries from the last committed offset, relying on
//! deterministic block ids to overwrite any partial flush.

use thiserror::Error;
use tracehouse_log::LogError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create encoding: {0}")]
    Encoding(#[source] tracehouse_storage::Error),

    #[error("failed to open WAL: {0}")]
    WalOpen(#[source] tracehouse_storage::Error),

    #[error("failed to ping log: {0}")]
    LogUnreachable(#[source] LogError),

    #[error("block builder already started")]
    AlreadyStarted,

    #[error("shutdown failed: {0}")]
    Shutdown(String),

    #[error("failed to fetch from log: {0}")]
    Fetch(#[source] LogError),

    #[error("failed to decode trace payload: {0}")]
    Decode(#[source] tracehouse_core::Error),

    #[error("failed to buffer traces: {0}")]
    Push(#[source] tracehouse_storage::Error),

    #[error("failed to flush section: {0}")]
    Flush(#[source] tracehouse_storage::Error),

    #[error("failed to commit offset: {0}")]
    Commit(#[source] LogError),
}
