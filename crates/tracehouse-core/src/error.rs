//! Error types for core codec operations.
//!
//! All fallible functions in this crate return `Result<T>` which is aliased
//! to `Result<T, Error>`, allowing clean propagation with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic byte: {0:#04x}")]
    InvalidMagic(u8),

    #[error("Invalid push frame: {0}")]
    InvalidFrame(String),
}
