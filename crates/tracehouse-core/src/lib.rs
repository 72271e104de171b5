//! Core types shared across the Tracehouse ingestion pipeline.
//!
//! This crate defines the two data shapes every other crate agrees on:
//!
//! 1. [`Record`] - a single entry of the partitioned, durable log the
//!    block-builder consumes. Equivalent to a Kafka record: partition,
//!    offset, producer timestamp, tenant key, encoded payload.
//! 2. [`PushRequest`] - the decoded form of a record's payload: a batch of
//!    trace entries, each a trace id plus opaque encoded trace bytes.
//!    [`Decoder`] parses the wire framing and reuses its buffers between
//!    records.

pub mod error;
pub mod ingest;
pub mod record;

pub use error::{Error, Result};
pub use ingest::{encode_push, Decoder, PushRequest, TraceEntry};
pub use record::Record;
