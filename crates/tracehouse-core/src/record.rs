//! Record Data Structure
//!
//! This module defines the `Record` type, the unit of data the block-builder
//! reads from the partitioned log.
//!
//! ## Structure
//!
//! Each record carries:
//! - **partition**: the log partition the record was read from
//! - **offset**: unique, monotonically increasing position within the partition
//! - **timestamp**: producer-assigned wall clock (milliseconds since epoch)
//! - **key**: optional tenant identifier (opaque bytes)
//! - **value**: the encoded push-request payload
//!
//! ## Design Decisions
//!
//! - Uses `bytes::Bytes` for zero-copy slicing of key and value
//! - Offset is i64 to match the log's committed-offset arithmetic, where
//!   negative values act as a "no commit" sentinel
//! - Timestamps never gate processing; the consumer anchors its cycle on the
//!   first record's timestamp, however old it is

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single record read from one partition of the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Partition this record belongs to
    pub partition: i32,

    /// Offset of this record within the partition
    pub offset: i64,

    /// Producer-assigned timestamp in milliseconds since epoch
    pub timestamp: u64,

    /// Optional tenant key
    pub key: Option<Bytes>,

    /// Encoded payload
    pub value: Bytes,
}

impl Record {
    pub fn new(
        partition: i32,
        offset: i64,
        timestamp: u64,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Self {
        Self {
            partition,
            offset,
            timestamp,
            key,
            value,
        }
    }

    /// Tenant identifier carried in the record key. A record without a key
    /// resolves to the empty tenant.
    pub fn tenant(&self) -> String {
        self.key
            .as_ref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default()
    }

    /// Estimate the in-memory size of this record in bytes
    pub fn estimated_size(&self) -> usize {
        4 + // partition
        8 + // offset
        8 + // timestamp
        self.key.as_ref().map(|k| k.len()).unwrap_or(0) +
        self.value.len()
    }
}
