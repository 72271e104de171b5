//! Lag Reporter - Background Consumption Lag Metrics
//!
//! Runs beside the consume loop and publishes how far each assigned
//! partition's committed position trails the log's head, every 15 seconds.
//! It shares the log client with the consumer but only uses admin-side
//! reads, so the two tasks never contend on consume state.
//!
//! ## Lag Definition
//!
//! The lag is the distance between the last produced offset (high
//! watermark) and an offset in the past. If the builder has committed for a
//! partition at least once, that past offset is the committed one.
//! Otherwise, for example on a first run, it falls back to the earliest
//! retained offset. A missing consumer group means the same thing as no
//! commits and is not an error.
//!
//! The group is always treated as having no live members; the builder
//! assigns partitions itself and never participates in group rebalancing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::error;

use tracehouse_log::{LogClient, LogError};
use tracehouse_observability::metrics::PARTITION_LAG;

use crate::config::BlockBuilderConfig;
use crate::ring::{assigned_active_partitions, PartitionRingReader};

const LAG_INTERVAL: Duration = Duration::from_secs(15);

/// Background task publishing per-partition offset lag.
pub(crate) struct LagReporter {
    cfg: BlockBuilderConfig,
    log: Arc<dyn LogClient>,
    ring: Arc<dyn PartitionRingReader>,
}

impl LagReporter {
    pub(crate) fn new(
        cfg: BlockBuilderConfig,
        log: Arc<dyn LogClient>,
        ring: Arc<dyn PartitionRingReader>,
    ) -> Self {
        Self { cfg, log, ring }
    }

    pub(crate) async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(LAG_INTERVAL) => {
                    match group_lag(
                        self.log.as_ref(),
                        &self.cfg.log.topic,
                        &self.cfg.log.consumer_group,
                    )
                    .await
                    {
                        Ok(lag) => {
                            let ring = self.ring.partition_ring();
                            for partition in
                                assigned_active_partitions(self.cfg.own_partitions(), &ring)
                            {
                                if let Some(value) = lag.get(&partition) {
                                    PARTITION_LAG
                                        .with_label_values(&[&partition.to_string()])
                                        .set(*value);
                                }
                            }
                        }
                        Err(err) => error!(error = %err, "metric lag failed"),
                    }
                }
            }
        }
    }
}

/// Per-partition lag of `group` on `topic`.
///
/// Tolerates a group that has never committed: `GroupNotFound` degrades to
/// an empty commit map and the lag falls back to `end - start`.
pub(crate) async fn group_lag(
    log: &dyn LogClient,
    topic: &str,
    group: &str,
) -> Result<HashMap<i32, i64>, LogError> {
    let commits = match log.fetch_offsets(group, topic).await {
        Ok(commits) => commits,
        Err(LogError::GroupNotFound(_)) => HashMap::new(),
        Err(err) => return Err(err),
    };

    let starts = log.list_start_offsets(topic).await?;
    let ends = log.list_end_offsets(topic).await?;

    let mut lag = HashMap::with_capacity(ends.len());
    for (partition, end) in ends {
        let reference = commits
            .get(&partition)
            .copied()
            .or_else(|| starts.get(&partition).copied())
            .unwrap_or(0);
        lag.insert(partition, end - reference);
    }
    Ok(lag)
}
