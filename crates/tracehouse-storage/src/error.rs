//! Storage error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Unknown block encoding version: {0}")]
    UnknownVersion(String),

    #[error("Invalid compression type: {0}")]
    InvalidCompression(u8),

    #[error("Block encoding error: {0}")]
    Encoding(String),

    #[error("Invalid bloom filter data: {0}")]
    Bloom(String),

    #[error("Block metadata error: {0}")]
    Meta(#[from] serde_json::Error),
}
