//! Log client interface for the Tracehouse block-builder.
//!
//! The block-builder consumes trace records from a partitioned, durable,
//! append-only log with per-partition offsets and a consumer-group offset
//! store. This crate defines the [`LogClient`] trait the builder programs
//! against, plus [`MemoryLog`], a complete in-process implementation used by
//! tests and local development.
//!
//! ## Consumption Model
//!
//! The builder does not use group-managed consumption. It assigns itself one
//! partition at a time with an explicit start offset
//! ([`LogClient::add_consume_partition`]), polls fetches until a poll times
//! out, and removes the assignment before moving on. Re-adding a partition
//! rewinds its cursor, so a cycle always starts exactly at the committed
//! offset regardless of what a previous cycle over-consumed.

pub mod client;
pub mod error;
pub mod memory;

pub use client::{Fetches, LogClient, StartOffset};
pub use error::{LogError, Result};
pub use memory::MemoryLog;
