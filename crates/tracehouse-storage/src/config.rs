//! Storage Configuration
//!
//! Configuration for block creation and the WAL scratch directory. Every
//! field carries a serde default so partial configs deserialize cleanly.
//!
//! ## BlockConfig
//!
//! Controls how sealed blocks are encoded:
//!
//! - **version**: block format version; empty string selects the default
//! - **encoding**: payload compression (default: LZ4)
//! - **index_downsample_bytes**: record an index entry roughly every N bytes
//!   of block data (default: 1MB)
//! - **bloom_fp**: bloom filter target false positive rate (default: 1%)
//! - **bloom_shard_size_bytes**: target size per bloom shard (default: 100KB)
//! - **index_page_size_bytes**: index page sizing carried verbatim into
//!   block metadata for readers (default: 250KB)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::encoding::Compression;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Block format version; empty selects the default encoding
    #[serde(default)]
    pub version: String,

    /// Payload compression (default: LZ4)
    #[serde(default)]
    pub encoding: Compression,

    /// Record an index entry roughly every N bytes of block data
    #[serde(default = "default_index_downsample_bytes")]
    pub index_downsample_bytes: usize,

    /// Bloom filter target false positive rate
    #[serde(default = "default_bloom_fp")]
    pub bloom_fp: f64,

    /// Target size of one bloom filter shard
    #[serde(default = "default_bloom_shard_size_bytes")]
    pub bloom_shard_size_bytes: usize,

    /// Index page size carried into block metadata
    #[serde(default = "default_index_page_size_bytes")]
    pub index_page_size_bytes: usize,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            version: String::new(),
            encoding: Compression::default(),
            index_downsample_bytes: default_index_downsample_bytes(),
            bloom_fp: default_bloom_fp(),
            bloom_shard_size_bytes: default_bloom_shard_size_bytes(),
            index_page_size_bytes: default_index_page_size_bytes(),
        }
    }
}

fn default_index_downsample_bytes() -> usize {
    1024 * 1024 // 1MB
}

fn default_bloom_fp() -> f64 {
    0.01
}

fn default_bloom_shard_size_bytes() -> usize {
    100_000
}

fn default_index_page_size_bytes() -> usize {
    250_000
}

/// WAL scratch directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Directory holding in-flight section files
    #[serde(default = "default_wal_filepath")]
    pub filepath: PathBuf,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            filepath: default_wal_filepath(),
        }
    }
}

fn default_wal_filepath() -> PathBuf {
    PathBuf::from("./wal")
}
