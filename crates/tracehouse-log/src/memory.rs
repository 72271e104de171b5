//! In-Memory Log Broker
//!
//! A complete in-process implementation of [`LogClient`] backed by plain
//! vectors. It exists for tests and local development: scenario tests drive
//! the block-builder against it end to end, producing records and injecting
//! commit failures without a real broker.
//!
//! ## Semantics
//!
//! - One `Vec<Record>` per partition; a record's offset is its index, so
//!   offsets are dense and start at 0.
//! - Consumer-group commits live in a nested map and are never interpreted
//!   by the broker; offset arithmetic is entirely the consumer's business.
//! - Assignment cursors model the real client's rewind behavior: re-adding a
//!   partition resets its cursor to the requested offset.
//! - `poll_fetches` parks on a `Notify` until a producer appends data or the
//!   deadline passes, returning `DeadlineExceeded` in the latter case.
//!
//! ## Fault Injection
//!
//! Tests can queue per-commit failures with [`MemoryLog::fail_next_commit`]
//! (the attempt is still counted, like a broker answering with an error
//! code) and flip reachability with [`MemoryLog::set_reachable`] to exercise
//! the startup ping backoff.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tracehouse_core::Record;
use tracing::debug;

use crate::client::{Fetches, LogClient, StartOffset};
use crate::error::{LogError, Result};

/// Upper bound on records returned by a single poll.
const MAX_POLL_RECORDS: usize = 1024;

/// In-memory log broker implementing [`LogClient`].
pub struct MemoryLog {
    state: Mutex<State>,
    notify: Notify,
}

struct State {
    topics: HashMap<String, Vec<Vec<Record>>>,
    // group -> (topic, partition) -> committed offset
    groups: HashMap<String, HashMap<(String, i32), i64>>,
    assignments: Vec<Assignment>,
    injected_commit_errors: VecDeque<LogError>,
    commit_attempts: u64,
    reachable: bool,
    closed: bool,
}

struct Assignment {
    topic: String,
    partition: i32,
    next: i64,
}

impl MemoryLog {
    /// Create a broker with a single topic of `partitions` partitions.
    pub fn new(topic: &str, partitions: i32) -> Self {
        let mut topics = HashMap::new();
        topics.insert(
            topic.to_string(),
            (0..partitions).map(|_| Vec::new()).collect(),
        );
        Self {
            state: Mutex::new(State {
                topics,
                groups: HashMap::new(),
                assignments: Vec::new(),
                injected_commit_errors: VecDeque::new(),
                commit_attempts: 0,
                reachable: true,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Append a record and return its offset.
    pub fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Bytes>,
        value: Bytes,
        timestamp: u64,
    ) -> Result<i64> {
        let mut state = self.state.lock().expect("log state poisoned");
        let partition_log = state.partition_mut(topic, partition)?;
        let offset = partition_log.len() as i64;
        partition_log.push(Record::new(partition, offset, timestamp, key, value));
        drop(state);

        self.notify.notify_waiters();
        Ok(offset)
    }

    /// Total commit attempts observed, including rejected ones.
    pub fn commit_count(&self) -> u64 {
        self.state.lock().expect("log state poisoned").commit_attempts
    }

    /// Queue an error for the next commit attempt. Queued errors are
    /// consumed in order, one per attempt.
    pub fn fail_next_commit(&self, err: LogError) {
        self.state
            .lock()
            .expect("log state poisoned")
            .injected_commit_errors
            .push_back(err);
    }

    /// Make `ping` fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().expect("log state poisoned").reachable = reachable;
    }

    /// Number of currently assigned consume partitions.
    pub fn assignment_count(&self) -> usize {
        self.state.lock().expect("log state poisoned").assignments.len()
    }

    fn take_available(state: &mut State) -> Vec<Record> {
        let mut out = Vec::new();
        // Work around the borrow of assignments while reading topics.
        let mut cursors: Vec<(usize, String, i32, i64)> = state
            .assignments
            .iter()
            .enumerate()
            .map(|(i, a)| (i, a.topic.clone(), a.partition, a.next))
            .collect();

        for (idx, topic, partition, next) in cursors.drain(..) {
            if out.len() >= MAX_POLL_RECORDS {
                break;
            }
            let Some(partitions) = state.topics.get(&topic) else {
                continue;
            };
            let Some(log) = partitions.get(partition as usize) else {
                continue;
            };
            let start = next.max(0) as usize;
            if start >= log.len() {
                continue;
            }
            let take = (log.len() - start).min(MAX_POLL_RECORDS - out.len());
            out.extend_from_slice(&log[start..start + take]);
            state.assignments[idx].next = (start + take) as i64;
        }
        out
    }
}

impl State {
    fn partition_mut(&mut self, topic: &str, partition: i32) -> Result<&mut Vec<Record>> {
        self.topics
            .get_mut(topic)
            .and_then(|partitions| partitions.get_mut(partition as usize))
            .ok_or_else(|| LogError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })
    }

    fn partition(&self, topic: &str, partition: i32) -> Result<&Vec<Record>> {
        self.topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition as usize))
            .ok_or_else(|| LogError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })
    }

    fn check_reachable(&self) -> Result<()> {
        if self.closed {
            return Err(LogError::Closed);
        }
        if !self.reachable {
            return Err(LogError::Unreachable);
        }
        Ok(())
    }
}

#[async_trait]
impl LogClient for MemoryLog {
    async fn ping(&self) -> Result<()> {
        self.state.lock().expect("log state poisoned").check_reachable()
    }

    fn add_consume_partition(&self, topic: &str, partition: i32, offset: StartOffset) {
        let mut state = self.state.lock().expect("log state poisoned");
        let end = state
            .partition(topic, partition)
            .map(|log| log.len() as i64)
            .unwrap_or(0);
        let next = match offset {
            StartOffset::Earliest => 0,
            StartOffset::Latest => end,
            StartOffset::At(o) => o,
        };

        // Re-adding rewinds the cursor rather than adding a duplicate.
        state
            .assignments
            .retain(|a| !(a.topic == topic && a.partition == partition));
        state.assignments.push(Assignment {
            topic: topic.to_string(),
            partition,
            next,
        });
        debug!(topic, partition, next, "partition assigned");
    }

    fn remove_consume_partition(&self, topic: &str, partition: i32) {
        let mut state = self.state.lock().expect("log state poisoned");
        state
            .assignments
            .retain(|a| !(a.topic == topic && a.partition == partition));
        debug!(topic, partition, "partition removed");
    }

    async fn poll_fetches(&self, max_wait: Duration) -> Fetches {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            // Register as a waiter before checking state so a produce racing
            // with the check cannot be missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().expect("log state poisoned");
                if state.closed {
                    return Fetches::from_error(LogError::Closed);
                }
                let records = Self::take_available(&mut state);
                if !records.is_empty() {
                    return Fetches::from_records(records);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Fetches::from_error(LogError::DeadlineExceeded);
            }
        }
    }

    async fn fetch_committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>> {
        let state = self.state.lock().expect("log state poisoned");
        state.check_reachable()?;
        Ok(state
            .groups
            .get(group)
            .and_then(|commits| commits.get(&(topic.to_string(), partition)))
            .copied())
    }

    async fn commit_offset(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("log state poisoned");
        state.check_reachable()?;
        state.commit_attempts += 1;

        if let Some(err) = state.injected_commit_errors.pop_front() {
            return Err(err);
        }

        state
            .groups
            .entry(group.to_string())
            .or_default()
            .insert((topic.to_string(), partition), offset);
        Ok(())
    }

    async fn list_start_offsets(&self, topic: &str) -> Result<HashMap<i32, i64>> {
        let state = self.state.lock().expect("log state poisoned");
        state.check_reachable()?;
        let partitions = state
            .topics
            .get(topic)
            .ok_or_else(|| LogError::UnknownPartition {
                topic: topic.to_string(),
                partition: -1,
            })?;
        // Nothing is ever truncated, so the earliest offset is always 0.
        Ok((0..partitions.len() as i32).map(|p| (p, 0)).collect())
    }

    async fn list_end_offsets(&self, topic: &str) -> Result<HashMap<i32, i64>> {
        let state = self.state.lock().expect("log state poisoned");
        state.check_reachable()?;
        let partitions = state
            .topics
            .get(topic)
            .ok_or_else(|| LogError::UnknownPartition {
                topic: topic.to_string(),
                partition: -1,
            })?;
        Ok(partitions
            .iter()
            .enumerate()
            .map(|(p, log)| (p as i32, log.len() as i64))
            .collect())
    }

    async fn fetch_offsets(&self, group: &str, topic: &str) -> Result<HashMap<i32, i64>> {
        let state = self.state.lock().expect("log state poisoned");
        state.check_reachable()?;
        let commits = state
            .groups
            .get(group)
            .ok_or_else(|| LogError::GroupNotFound(group.to_string()))?;
        Ok(commits
            .iter()
            .filter(|((t, _), _)| t == topic)
            .map(|((_, partition), offset)| (*partition, *offset))
            .collect())
    }

    fn close(&self) {
        self.state.lock().expect("log state poisoned").closed = true;
        self.notify.notify_waiters();
    }
}
