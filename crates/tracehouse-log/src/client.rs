//! The `LogClient` trait and fetch result types.
//!
//! The trait splits into two halves, mirroring how the builder uses it:
//!
//! - **Consume side**: partition assignment and `poll_fetches`. Assignment
//!   mutation is synchronous (it only changes client-local cursors), which
//!   lets callers release a partition from a drop guard on every exit path.
//! - **Admin side**: committed-offset lookup and commit, watermark listing,
//!   and group offset fetch, used for offset management and lag reporting.
//!
//! Offset conventions: a committed offset of 0 is valid; "no commit" is an
//! absent map entry or a negative sentinel. Committed offsets are
//! next-to-consume, so a commit of `last.offset + 1` means everything up to
//! and including `last` is durable in storage.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracehouse_core::Record;

use crate::error::{LogError, Result};

/// Where to place a partition cursor when assigning it for consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// Earliest retained offset. Catches a first-time consumer up from the
    /// beginning rather than skipping history.
    Earliest,
    /// Next offset to be produced.
    Latest,
    /// An exact offset.
    At(i64),
}

/// Result of one `poll_fetches` call: records in partition-offset order, or
/// a fetch error.
#[derive(Debug, Default)]
pub struct Fetches {
    records: Vec<Record>,
    err: Option<LogError>,
}

impl Fetches {
    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records, err: None }
    }

    pub fn from_error(err: LogError) -> Self {
        Self {
            records: Vec::new(),
            err: Some(err),
        }
    }

    /// Transport-level fetch error, if any.
    pub fn error(&self) -> Option<&LogError> {
        self.err.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in the order they must be processed.
    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

/// Client interface to the partitioned durable log.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Liveness check, used during startup with bounded backoff.
    async fn ping(&self) -> Result<()>;

    /// Assign a partition for consumption starting at `offset`. Re-adding an
    /// already-assigned partition rewinds its cursor.
    fn add_consume_partition(&self, topic: &str, partition: i32, offset: StartOffset);

    /// Remove a partition assignment. Unknown assignments are ignored.
    fn remove_consume_partition(&self, topic: &str, partition: i32);

    /// Wait up to `max_wait` for records on the assigned partitions. Returns
    /// a `DeadlineExceeded` fetch error when the timeout elapses with no
    /// data.
    async fn poll_fetches(&self, max_wait: Duration) -> Fetches;

    /// Committed offset for one partition in a consumer group. `Ok(None)`
    /// when the group or partition has no commit.
    async fn fetch_committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>>;

    /// Commit a next-to-consume offset to the group's offset store. A
    /// coordinator-side rejection (for example `RebalanceInProgress`)
    /// surfaces as an error even when the transport succeeded.
    async fn commit_offset(&self, group: &str, topic: &str, partition: i32, offset: i64)
        -> Result<()>;

    /// Earliest retained offset per partition.
    async fn list_start_offsets(&self, topic: &str) -> Result<HashMap<i32, i64>>;

    /// Next-to-be-produced offset per partition (high watermark).
    async fn list_end_offsets(&self, topic: &str) -> Result<HashMap<i32, i64>>;

    /// All committed offsets of a group for one topic. Errs with
    /// `GroupNotFound` when the group has never committed.
    async fn fetch_offsets(&self, group: &str, topic: &str) -> Result<HashMap<i32, i64>>;

    /// Release client resources. Pending polls return promptly.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetches_from_records() {
        let fetches = Fetches::from_records(vec![Record::new(0, 0, 1, None, Default::default())]);
        assert!(fetches.error().is_none());
        assert!(!fetches.is_empty());
        assert_eq!(fetches.records().len(), 1);
    }

    #[test]
    fn test_fetches_from_error_is_empty() {
        let fetches = Fetches::from_error(LogError::DeadlineExceeded);
        assert!(fetches.is_empty());
        assert_eq!(fetches.error(), Some(&LogError::DeadlineExceeded));
    }

    #[test]
    fn test_start_offset_equality() {
        assert_eq!(StartOffset::At(0), StartOffset::At(0));
        assert_ne!(StartOffset::Earliest, StartOffset::Latest);
    }
}
