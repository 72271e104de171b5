//! Storage layer for the Tracehouse block-builder.
//!
//! This crate owns everything between a decoded trace batch and an immutable
//! block in object storage:
//!
//! 1. **WAL scratch buffers** ([`wal`]): per-tenant write-ahead files that
//!    buffer the in-flight section of a consumption cycle.
//! 2. **Block encoding** ([`encoding`]): sealing a tenant's buffered traces
//!    into a compressed, indexed, bloom-filtered block.
//! 3. **Deterministic identity** ([`block`]): block ids are a pure function
//!    of `(partition, cycle end, tenant)`, so reprocessing the same cycle
//!    after a failure overwrites the previous attempt instead of
//!    duplicating it.
//! 4. **Block store** ([`store`]): the `WriteBlock` interface plus an
//!    object-store-backed implementation.

pub mod block;
pub mod bloom;
pub mod config;
pub mod encoding;
pub mod error;
pub mod store;
pub mod wal;

pub use block::{deterministic_block_id, BlockMeta, DedicatedColumn, EncodedBlock};
pub use bloom::ShardedBloomFilter;
pub use config::{BlockConfig, WalConfig};
pub use encoding::{Compression, VersionedEncoding};
pub use error::{Error, Result};
pub use store::{BlockStore, ObjectBlockStore};
pub use wal::{TenantWal, Wal};
