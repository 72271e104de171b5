//! Tracehouse Block-Builder
//!
//! The block-builder is the compaction stage of the ingestion pipeline: it
//! consumes trace records from the partitioned durable log and seals them
//! into immutable, content-addressed blocks in long-term storage.
//!
//! ## The Cycle
//!
//! ```text
//! ┌──────────────┐   records    ┌─────────────────┐   blocks   ┌─────────┐
//! │ Partitioned  │ ───────────► │ Partition       │ ─────────► │ Block   │
//! │ log          │              │ consumer        │            │ store   │
//! └──────────────┘              │  - cycle window │            └─────────┘
//!        ▲                      │  - section      │
//!        │ commit offset        │    writer       │
//!        └──────────────────────┴─────────────────┘
//! ```
//!
//! Per partition, each cycle runs consume → build → flush → commit:
//!
//! 1. Rewind to the committed offset and poll records.
//! 2. Buffer them per tenant in a WAL-backed section writer. The first
//!    record's timestamp anchors the cycle window.
//! 3. Flush one block per tenant to storage.
//! 4. Commit `last offset + 1` to the log's consumer-group offset store.
//!
//! The flush-before-commit ordering plus deterministic block ids (derived
//! from the cycle window, never from wall clock or randomness) give
//! exactly-once-into-storage semantics on top of the log's at-least-once
//! delivery: any failure between flush and commit makes the next sweep
//! regenerate the same block ids and overwrite the earlier attempt.

pub mod builder;
pub mod config;
pub mod error;
mod lag;
pub mod overrides;
pub mod retry;
pub mod ring;
mod section;

pub use builder::BlockBuilder;
pub use config::{BlockBuilderConfig, LogConfig, CONSUMER_GROUP};
pub use error::{Error, Result};
pub use overrides::{NoopOverrides, Overrides};
pub use retry::BackoffPolicy;
pub use ring::{
    assigned_active_partitions, PartitionDesc, PartitionRing, PartitionRingReader, PartitionState,
    StaticPartitionRingReader,
};
