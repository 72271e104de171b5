//! Versioned Block Encoding
//!
//! Seals a tenant's buffered traces into the immutable block format.
//!
//! ## Block Layout (v1)
//!
//! ```text
//! ┌─────────┬──────────┬─────────────┬──────────┬───────────────────────┐
//! │ Magic   │ Format   │ Compression │ Reserved │ Body                  │
//! │ "THBK"  │ (2 B LE) │ (1 B)       │ (1 B)    │ (possibly compressed) │
//! └─────────┴──────────┴─────────────┴──────────┴───────────────────────┘
//!
//! Body, one frame per trace in ascending trace-id order:
//! ┌───────────┬──────────┬────────────┬───────────────────────────┐
//! │ Id Size   │ Trace Id │ Part Count │ Parts                     │
//! │ (4 B LE)  │ (N B)    │ (4 B LE)   │ per part: size + bytes    │
//! └───────────┴──────────┴────────────┴───────────────────────────┘
//! ```
//!
//! A trace pushed several times within one cycle stays one frame with
//! several parts; readers merge parts when materializing the trace.
//!
//! ## Index and Bloom
//!
//! Alongside the data, [`BlockWriter`] builds a downsampled offset index
//! (one entry roughly every `index_downsample_bytes` of uncompressed body,
//! always including the first trace) and a sharded bloom filter over trace
//! ids. Index offsets refer to positions in the uncompressed body.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::bloom::ShardedBloomFilter;
use crate::config::BlockConfig;
use crate::error::{Error, Result};

/// Magic bytes at the start of every block.
pub const BLOCK_MAGIC: [u8; 4] = *b"THBK";

/// On-disk format revision of the v1 encoding.
pub const BLOCK_FORMAT_VERSION: u16 = 1;

/// Payload compression applied to the block body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None = 0,
    #[default]
    Lz4 = 1,
}

impl TryFrom<u8> for Compression {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            _ => Err(Error::InvalidCompression(value)),
        }
    }
}

/// Block format versions the builder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionedEncoding {
    V1,
}

impl VersionedEncoding {
    /// The encoding used when no version is configured.
    pub fn default_encoding() -> Self {
        VersionedEncoding::V1
    }

    /// Resolve a configured version string.
    pub fn from_version(version: &str) -> Result<Self> {
        match version {
            "v1" => Ok(VersionedEncoding::V1),
            other => Err(Error::UnknownVersion(other.to_string())),
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            VersionedEncoding::V1 => "v1",
        }
    }
}

impl fmt::Display for VersionedEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.version())
    }
}

/// Output of sealing one tenant's traces.
pub struct SealedData {
    pub data: Bytes,
    pub index: Bytes,
    pub bloom: Bytes,
    pub total_objects: u64,
    pub index_entries: u32,
    pub bloom_shards: u32,
    pub uncompressed_size: u64,
}

/// Builds the encoded body, index and bloom filter for one block.
///
/// Traces must be appended in ascending trace-id order; the caller owns the
/// ordering (the WAL aggregator iterates a sorted map).
pub struct BlockWriter {
    encoding: VersionedEncoding,
    compression: Compression,
    index_downsample_bytes: usize,
    body: BytesMut,
    index: Vec<(Bytes, u64)>,
    bytes_since_index: usize,
    bloom: ShardedBloomFilter,
    total_objects: u64,
}

impl BlockWriter {
    pub fn new(encoding: VersionedEncoding, cfg: &BlockConfig, expected_traces: usize) -> Self {
        Self {
            encoding,
            compression: cfg.encoding,
            index_downsample_bytes: cfg.index_downsample_bytes.max(1),
            body: BytesMut::new(),
            index: Vec::new(),
            bytes_since_index: 0,
            bloom: ShardedBloomFilter::new(
                expected_traces,
                cfg.bloom_fp,
                cfg.bloom_shard_size_bytes,
            ),
            total_objects: 0,
        }
    }

    /// Append one trace aggregate (its id plus all pushed parts).
    pub fn append_trace(&mut self, trace_id: &Bytes, parts: &[Bytes]) -> Result<()> {
        if parts.is_empty() {
            return Err(Error::Encoding("trace with no parts".to_string()));
        }

        let frame_start = self.body.len() as u64;

        // Index the first trace, then one entry per downsample window.
        if self.index.is_empty() || self.bytes_since_index >= self.index_downsample_bytes {
            self.index.push((trace_id.clone(), frame_start));
            self.bytes_since_index = 0;
        }

        self.body.put_u32_le(trace_id.len() as u32);
        self.body.put_slice(trace_id);
        self.body.put_u32_le(parts.len() as u32);
        for part in parts {
            self.body.put_u32_le(part.len() as u32);
            self.body.put_slice(part);
        }

        self.bytes_since_index += self.body.len() - frame_start as usize;
        self.bloom.add(trace_id);
        self.total_objects += 1;
        Ok(())
    }

    /// Seal the writer into the final artifacts.
    pub fn finish(self) -> Result<SealedData> {
        let VersionedEncoding::V1 = self.encoding;

        let uncompressed_size = self.body.len() as u64;
        let body = match self.compression {
            Compression::None => self.body.freeze(),
            Compression::Lz4 => Bytes::from(lz4_flex::compress_prepend_size(&self.body)),
        };

        let mut data = BytesMut::with_capacity(8 + body.len());
        data.put_slice(&BLOCK_MAGIC);
        data.put_u16_le(BLOCK_FORMAT_VERSION);
        data.put_u8(self.compression as u8);
        data.put_u8(0); // reserved
        data.put_slice(&body);

        let mut index = BytesMut::new();
        index.put_u32_le(self.index.len() as u32);
        for (trace_id, offset) in &self.index {
            index.put_u32_le(trace_id.len() as u32);
            index.put_slice(trace_id);
            index.put_u64_le(*offset);
        }

        Ok(SealedData {
            data: data.freeze(),
            index: index.freeze(),
            bloom: self.bloom.to_bytes(),
            total_objects: self.total_objects,
            index_entries: self.index.len() as u32,
            bloom_shards: self.bloom.shard_count(),
            uncompressed_size,
        })
    }
}
