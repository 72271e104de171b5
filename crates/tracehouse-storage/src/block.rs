//! Block Identity and Metadata
//!
//! A block is the unit of durability: one immutable artifact per
//! `(partition, cycle, tenant)` triple, written to object storage.
//!
//! ## Deterministic Identity
//!
//! [`deterministic_block_id`] derives the block id purely from the partition
//! id, the cycle's end timestamp and the tenant. No random material and no
//! wall clock at flush time. Reprocessing the same cycle after a flush or
//! commit failure therefore regenerates the *same* id, and the rewritten
//! block overwrites the earlier attempt instead of accumulating next to it.
//! This is what turns the log's at-least-once delivery into
//! exactly-once-into-storage.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::encoding::Compression;

/// Tenant-specific schema extension carried into block creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedicatedColumn {
    /// Attribute scope the column applies to (for example "span" or
    /// "resource")
    pub scope: String,

    /// Attribute name promoted to a dedicated column
    pub name: String,
}

/// Metadata describing one sealed block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMeta {
    /// Deterministic block id
    pub id: Uuid,

    /// Owning tenant
    pub tenant: String,

    /// Log partition the section was consumed from
    pub partition: i32,

    /// Offset of the first record in the section
    pub start_offset: i64,

    /// Number of distinct trace aggregates in the block
    pub total_objects: u64,

    /// Block format version
    pub version: String,

    /// Payload compression
    pub compression: Compression,

    /// Smallest record timestamp contributing to the block (ms)
    pub min_timestamp: u64,

    /// Largest record timestamp contributing to the block (ms)
    pub max_timestamp: u64,

    /// Encoded data size in bytes
    pub size_bytes: u64,

    /// Number of entries in the offset index
    pub index_entries: u32,

    /// Configured index page size, carried verbatim for readers
    pub index_page_size_bytes: usize,

    /// Number of bloom filter shards
    pub bloom_shards: u32,

    /// Tenant schema extensions active when the block was cut
    pub dedicated_columns: Vec<DedicatedColumn>,
}

/// A sealed block ready for the store: metadata plus the encoded data,
/// serialized bloom filter and offset index.
#[derive(Debug, Clone)]
pub struct EncodedBlock {
    pub meta: BlockMeta,
    pub data: Bytes,
    pub bloom: Bytes,
    pub index: Bytes,
}

/// Derive the block id for a `(partition, cycle end, tenant)` triple.
///
/// The id is the first 16 bytes of
/// `SHA-256(partition_be ++ cycle_end_ms_be ++ tenant)`.
pub fn deterministic_block_id(partition: i32, cycle_end_ms: u64, tenant: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(partition.to_be_bytes());
    hasher.update(cycle_end_ms.to_be_bytes());
    hasher.update(tenant.as_bytes());
    let digest = hasher.finalize();

    let mut id = [0u8; 16];
    id.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(id)
}
