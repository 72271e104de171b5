//! Block-Builder Service
//!
//! Owns the full lifecycle: startup (encoding resolution, WAL open, log
//! liveness ping with bounded backoff), the periodic consume-cycle driver,
//! the background lag reporter, and graceful stop.
//!
//! ## Offset Discipline
//!
//! The consumer gives exactly-once-into-storage semantics on top of the
//! log's at-least-once delivery with two rules:
//!
//! 1. **Flush precedes commit.** An offset is committed only after every
//!    block holding records up to that offset has been written durably. A
//!    crash between the two leaves the offset pointing before the blocks.
//! 2. **Deterministic block identity.** Reconsuming the same records
//!    regenerates the same block ids, so the re-flush overwrites the
//!    earlier attempt instead of duplicating it.
//!
//! There is deliberately no retry loop around flush or commit inside a
//! cycle; recovery is the next sweep plus rule 2.
//!
//! ## Partition Assignment
//!
//! The log client consumes exactly one partition at a time. The partition
//! is registered at `consume_partition` entry, with the cursor rewound to
//! the committed offset, and removed on every exit path by a drop guard.
//! This keeps the client's internal buffers bounded and prevents fetch
//! interleaving across partitions.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tracehouse_core::{Decoder, Record};
use tracehouse_log::{Fetches, LogClient, LogError, StartOffset};
use tracehouse_observability::metrics::{
    self, CONSUME_CYCLE_DURATION, FETCH_ERRORS_TOTAL, PARTITION_LAG_SECONDS,
    PROCESS_PARTITION_SECTION_DURATION,
};
use tracehouse_storage::{BlockStore, VersionedEncoding, Wal};

use crate::config::BlockBuilderConfig;
use crate::error::{Error, Result};
use crate::lag::LagReporter;
use crate::overrides::Overrides;
use crate::retry::BackoffPolicy;
use crate::ring::{assigned_active_partitions, PartitionRingReader};
use crate::section::SectionWriter;

/// How long one fetch poll may wait for data before the partition is
/// considered drained for this cycle.
const POLL_TIMEOUT: Duration = Duration::from_secs(2);

/// The block-builder service.
///
/// Construct with [`BlockBuilder::new`], then [`start`](Self::start) it;
/// the consume loop and lag reporter run as background tasks until
/// [`stop`](Self::stop).
pub struct BlockBuilder {
    cfg: BlockBuilderConfig,
    log: Arc<dyn LogClient>,
    partition_ring: Arc<dyn PartitionRingReader>,
    overrides: Arc<dyn Overrides>,
    store: Arc<dyn BlockStore>,
    state: tokio::sync::Mutex<Option<Started>>,
}

struct Started {
    cancel: CancellationToken,
    consume_handle: JoinHandle<()>,
    lag_handle: JoinHandle<()>,
}

impl BlockBuilder {
    pub fn new(
        cfg: BlockBuilderConfig,
        log: Arc<dyn LogClient>,
        partition_ring: Arc<dyn PartitionRingReader>,
        overrides: Arc<dyn Overrides>,
        store: Arc<dyn BlockStore>,
    ) -> Self {
        Self {
            cfg,
            log,
            partition_ring,
            overrides,
            store,
            state: tokio::sync::Mutex::new(None),
        }
    }

    /// Bring the service up: resolve the block encoding, open the WAL
    /// directory, wait for the log to answer a ping, then launch the
    /// consume loop and the lag reporter.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(Error::AlreadyStarted);
        }

        info!(instance = %self.cfg.instance_id, "Block builder starting");
        metrics::init();

        let enc = if self.cfg.block.version.is_empty() {
            VersionedEncoding::default_encoding()
        } else {
            VersionedEncoding::from_version(&self.cfg.block.version).map_err(Error::Encoding)?
        };

        let wal = Wal::open(&self.cfg.wal).await.map_err(Error::WalOpen)?;

        // If there is a network hiccup, waiting out retries beats failing
        // the whole service.
        let policy = BackoffPolicy::default();
        let mut attempt = 0usize;
        loop {
            match self.log.ping().await {
                Ok(()) => break,
                Err(err) => {
                    if attempt >= policy.max_retries {
                        return Err(Error::LogUnreachable(err));
                    }
                    warn!(error = %err, "Ping log failed; will retry");
                    tokio::time::sleep(policy.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }

        let cancel = CancellationToken::new();

        let lag = LagReporter::new(
            self.cfg.clone(),
            self.log.clone(),
            self.partition_ring.clone(),
        );
        let lag_handle = tokio::spawn(lag.run(cancel.clone()));

        let worker = ConsumeWorker {
            cfg: self.cfg.clone(),
            log: self.log.clone(),
            store: self.store.clone(),
            ring: self.partition_ring.clone(),
            overrides: self.overrides.clone(),
            enc,
            wal,
            decoder: Decoder::new(),
        };
        let consume_handle = tokio::spawn(worker.run(cancel.clone()));

        *state = Some(Started {
            cancel,
            consume_handle,
            lag_handle,
        });
        Ok(())
    }

    /// Stop the service: cancel both tasks, await them, close the log
    /// client last.
    pub async fn stop(&self) -> Result<()> {
        let Some(started) = self.state.lock().await.take() else {
            return Ok(());
        };

        started.cancel.cancel();
        started
            .consume_handle
            .await
            .map_err(|err| Error::Shutdown(err.to_string()))?;
        started
            .lag_handle
            .await
            .map_err(|err| Error::Shutdown(err.to_string()))?;

        self.log.close();
        info!(instance = %self.cfg.instance_id, "Block builder stopped");
        Ok(())
    }
}

/// The consume loop's owned state. Lives on its own task from start to
/// stop.
struct ConsumeWorker {
    cfg: BlockBuilderConfig,
    log: Arc<dyn LogClient>,
    store: Arc<dyn BlockStore>,
    ring: Arc<dyn PartitionRingReader>,
    overrides: Arc<dyn Overrides>,
    enc: VersionedEncoding,
    wal: Wal,
    decoder: Decoder,
}

impl ConsumeWorker {
    /// Drive consume sweeps until cancelled. The first sweep fires
    /// immediately; subsequent sweeps are spaced by the cycle duration.
    async fn run(mut self, cancel: CancellationToken) {
        let mut wait = Duration::ZERO;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {
                    if let Err(err) = self.consume(&cancel).await {
                        error!(error = %err, "Consume cycle failed");
                    }
                    wait = self.cfg.consume_cycle_duration;
                }
            }
        }
    }

    /// One sweep: drain every assigned active partition. The overall
    /// deadline is captured once; records stamped after it wait for the
    /// next sweep.
    async fn consume(&mut self, cancel: &CancellationToken) -> Result<()> {
        let overall_end = now_ms();
        let ring = self.ring.partition_ring();
        let partitions = assigned_active_partitions(self.cfg.own_partitions(), &ring);

        info!(
            cycle_end = overall_end,
            active_partitions = ?partitions,
            "Starting consume cycle"
        );
        let _timer = CONSUME_CYCLE_DURATION.start_timer();

        for partition in partitions {
            // Consume the partition while data remains.
            // TODO - round-robin one section per partition instead, to
            // equalize catch-up time across partitions.
            loop {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                let more = self.consume_partition(partition, overall_end).await?;
                if !more {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Drive one partition through one cycle: rewind to the committed
    /// offset, poll until the cycle closes or data runs out, flush, commit.
    /// Returns whether enough data remains for another full cycle.
    async fn consume_partition(&mut self, partition: i32, overall_end: u64) -> Result<bool> {
        let partition_label = partition.to_string();
        let _timer = PROCESS_PARTITION_SECTION_DURATION
            .with_label_values(&[&partition_label])
            .start_timer();

        let cycle_ms = self.cfg.consume_cycle_duration.as_millis() as u64;
        let topic = self.cfg.log.topic.clone();
        let group = self.cfg.log.consumer_group.clone();

        let committed = self
            .log
            .fetch_committed_offset(&group, &topic, partition)
            .await
            .map_err(Error::Fetch)?;
        let start_offset = match committed {
            Some(offset) if offset >= 0 => StartOffset::At(offset),
            _ => StartOffset::Earliest,
        };

        info!(
            partition,
            commit_offset = ?committed,
            start_offset = ?start_offset,
            "Consuming partition"
        );

        // Rewind the partition to the commit offset by reassigning it, so
        // the cycle starts exactly there and not at whatever was previously
        // over-consumed. The guard removes the assignment on every exit
        // path, keeping the client on one partition at a time.
        self.log.add_consume_partition(&topic, partition, start_offset);
        let _assignment = AssignmentGuard {
            log: self.log.clone(),
            topic: topic.clone(),
            partition,
        };

        let mut section: Option<SectionWriter> = None;
        let mut cycle_end = 0u64;
        let mut last: Option<Record> = None;
        let mut more = false;

        'outer: loop {
            let fetches: Fetches = self.log.poll_fetches(POLL_TIMEOUT).await;
            if let Some(err) = fetches.error() {
                if *err == LogError::DeadlineExceeded {
                    // No more data
                    break;
                }
                FETCH_ERRORS_TOTAL.with_label_values(&[&partition_label]).inc();
                return Err(Error::Fetch(err.clone()));
            }
            if fetches.is_empty() {
                break;
            }

            for rec in fetches.records() {
                debug!(
                    partition = rec.partition,
                    offset = rec.offset,
                    timestamp = rec.timestamp,
                    "Processing record"
                );

                // The first record anchors the cycle window.
                if section.is_none() {
                    cycle_end = rec.timestamp + cycle_ms;
                    PARTITION_LAG_SECONDS
                        .with_label_values(&[&partition_label])
                        .set(now_ms().saturating_sub(rec.timestamp) as f64 / 1000.0);
                    section = Some(SectionWriter::new(
                        partition,
                        rec.offset,
                        cycle_end,
                        self.cfg.block.clone(),
                        self.enc,
                        self.overrides.clone(),
                        self.wal.clone(),
                    ));
                }

                if rec.timestamp > overall_end {
                    // Defer this record to a later sweep entirely.
                    break 'outer;
                }

                if rec.timestamp > cycle_end {
                    // Close this cycle; continue only if at least another
                    // full cycle of data can fit before the deadline.
                    if overall_end.saturating_sub(rec.timestamp) >= cycle_ms {
                        more = true;
                    }
                    break 'outer;
                }

                let writer = section.as_mut().expect("section initialized on first record");
                self.push_traces(writer, rec).await?;
                last = Some(rec.clone());
            }
        }

        let (Some(mut writer), Some(last)) = (section, last) else {
            info!(partition, "No data");
            return Ok(false);
        };

        writer
            .flush(self.store.as_ref())
            .await
            .map_err(Error::Flush)?;

        // TODO - retry the commit before abandoning the cycle.
        self.log
            .commit_offset(&group, &topic, partition, last.offset + 1)
            .await
            .map_err(Error::Commit)?;

        info!(
            partition,
            last_record = last.offset,
            "Successfully committed offset to log"
        );

        Ok(more)
    }

    /// Decode one record's payload and buffer it under its tenant.
    async fn push_traces(&mut self, writer: &mut SectionWriter, rec: &Record) -> Result<()> {
        let tenant = rec.tenant();
        let req = self.decoder.decode(&rec.value).map_err(Error::Decode)?;
        writer
            .push_bytes(&tenant, req, rec.timestamp)
            .await
            .map_err(Error::Push)?;
        self.decoder.reset();
        Ok(())
    }
}

/// Removes a consume-partition registration when dropped, covering every
/// exit path of `consume_partition`.
struct AssignmentGuard {
    log: Arc<dyn LogClient>,
    topic: String,
    partition: i32,
}

impl Drop for AssignmentGuard {
    fn drop(&mut self) {
        self.log.remove_consume_partition(&self.topic, self.partition);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time before UNIX epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::memory::InMemory;
    use std::collections::HashMap;
    use tracehouse_core::{encode_push, PushRequest, TraceEntry};
    use tracehouse_log::MemoryLog;
    use tracehouse_storage::{ObjectBlockStore, WalConfig};

    use crate::overrides::NoopOverrides;
    use crate::ring::StaticPartitionRingReader;

    const TOPIC: &str = "test-topic";
    const GROUP: &str = "test-consumer-group";

    fn test_config(wal_dir: &std::path::Path) -> BlockBuilderConfig {
        let mut cfg = BlockBuilderConfig::default();
        cfg.consume_cycle_duration = Duration::from_secs(5);
        cfg.log.topic = TOPIC.to_string();
        cfg.log.consumer_group = GROUP.to_string();
        cfg.assigned_partitions =
            HashMap::from([(cfg.instance_id.clone(), vec![0])]);
        cfg.wal.filepath = wal_dir.to_path_buf();
        cfg
    }

    async fn test_worker(
        log: Arc<MemoryLog>,
        store: Arc<ObjectBlockStore>,
        wal_dir: &std::path::Path,
    ) -> ConsumeWorker {
        let cfg = test_config(wal_dir);
        let wal = Wal::open(&WalConfig {
            filepath: cfg.wal.filepath.clone(),
        })
        .await
        .unwrap();
        ConsumeWorker {
            cfg,
            log,
            store,
            ring: Arc::new(StaticPartitionRingReader::with_active_partitions(&[0])),
            overrides: Arc::new(NoopOverrides),
            enc: VersionedEncoding::V1,
            wal,
            decoder: Decoder::new(),
        }
    }

    fn produce_trace(log: &MemoryLog, tenant: &str, trace: &str, timestamp: u64) -> i64 {
        let req = PushRequest {
            entries: vec![TraceEntry {
                trace_id: Bytes::copy_from_slice(trace.as_bytes()),
                payload: Bytes::from_static(b"span bytes"),
            }],
        };
        log.produce(
            TOPIC,
            0,
            Some(Bytes::copy_from_slice(tenant.as_bytes())),
            encode_push(&req),
            timestamp,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_consume_partition_no_data() {
        let tmp = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryLog::new(TOPIC, 1));
        let store = Arc::new(ObjectBlockStore::new(Arc::new(InMemory::new())));
        let mut worker = test_worker(log.clone(), store, tmp.path()).await;

        let more = worker.consume_partition(0, now_ms()).await.unwrap();
        assert!(!more);
        assert_eq!(log.commit_count(), 0);
        // The assignment guard released the partition.
        assert_eq!(log.assignment_count(), 0);
    }

    #[tokio::test]
    async fn test_consume_partition_flushes_and_commits() {
        let tmp = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryLog::new(TOPIC, 1));
        let store = Arc::new(ObjectBlockStore::new(Arc::new(InMemory::new())));
        let mut worker = test_worker(log.clone(), store.clone(), tmp.path()).await;

        let now = now_ms();
        produce_trace(&log, "tenant-a", "trace-1", now);
        produce_trace(&log, "tenant-a", "trace-2", now + 1);
        let last = produce_trace(&log, "tenant-a", "trace-3", now + 2);

        let more = worker.consume_partition(0, now_ms()).await.unwrap();
        assert!(!more);

        let metas = store.block_metas("tenant-a").await;
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].total_objects, 3);
        assert_eq!(
            log.fetch_committed_offset(GROUP, TOPIC, 0).await.unwrap(),
            Some(last + 1)
        );
        assert_eq!(log.assignment_count(), 0);
    }

    #[tokio::test]
    async fn test_consume_partition_processes_old_timestamps() {
        // Cycle assignment is anchored on the first record's timestamp, so
        // an arbitrarily old record still gets consumed and flushed.
        let tmp = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryLog::new(TOPIC, 1));
        let store = Arc::new(ObjectBlockStore::new(Arc::new(InMemory::new())));
        let mut worker = test_worker(log.clone(), store.clone(), tmp.path()).await;

        let hour_ago = now_ms() - 3_600_000;
        let last = produce_trace(&log, "tenant-a", "trace-old", hour_ago);

        let more = worker.consume_partition(0, now_ms()).await.unwrap();
        assert!(!more);
        assert_eq!(store.block_metas("tenant-a").await.len(), 1);
        assert_eq!(
            log.fetch_committed_offset(GROUP, TOPIC, 0).await.unwrap(),
            Some(last + 1)
        );
    }

    #[tokio::test]
    async fn test_consume_partition_defers_future_records() {
        let tmp = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryLog::new(TOPIC, 1));
        let store = Arc::new(ObjectBlockStore::new(Arc::new(InMemory::new())));
        let mut worker = test_worker(log.clone(), store.clone(), tmp.path()).await;

        let overall_end = now_ms();
        produce_trace(&log, "tenant-a", "trace-1", overall_end + 10_000);

        let more = worker.consume_partition(0, overall_end).await.unwrap();
        assert!(!more);
        assert_eq!(log.commit_count(), 0);
        assert!(store.block_metas("tenant-a").await.is_empty());
    }

    #[tokio::test]
    async fn test_consume_partition_splits_cycles_at_boundary() {
        let tmp = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryLog::new(TOPIC, 1));
        let store = Arc::new(ObjectBlockStore::new(Arc::new(InMemory::new())));
        let mut worker = test_worker(log.clone(), store.clone(), tmp.path()).await;

        // Two bursts 10s apart with a 5s cycle: the second burst closes the
        // first cycle and leaves room for another full one.
        let start = now_ms() - 20_000;
        let first = produce_trace(&log, "tenant-a", "trace-1", start);
        let second = produce_trace(&log, "tenant-a", "trace-2", start + 10_000);

        let overall_end = now_ms();
        let more = worker.consume_partition(0, overall_end).await.unwrap();
        assert!(more);
        assert_eq!(
            log.fetch_committed_offset(GROUP, TOPIC, 0).await.unwrap(),
            Some(first + 1)
        );
        assert_eq!(store.block_metas("tenant-a").await.len(), 1);

        let more = worker.consume_partition(0, overall_end).await.unwrap();
        assert!(!more);
        assert_eq!(
            log.fetch_committed_offset(GROUP, TOPIC, 0).await.unwrap(),
            Some(second + 1)
        );
        // Different cycle windows mean different block ids.
        assert_eq!(store.block_metas("tenant-a").await.len(), 2);
    }

    #[tokio::test]
    async fn test_consume_partition_decode_error_aborts_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryLog::new(TOPIC, 1));
        let store = Arc::new(ObjectBlockStore::new(Arc::new(InMemory::new())));
        let mut worker = test_worker(log.clone(), store.clone(), tmp.path()).await;

        log.produce(
            TOPIC,
            0,
            Some(Bytes::from_static(b"tenant-a")),
            Bytes::from_static(b"not a push request"),
            now_ms(),
        )
        .unwrap();

        let err = worker.consume_partition(0, now_ms()).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(log.commit_count(), 0);
        assert_eq!(log.assignment_count(), 0);
    }

    #[tokio::test]
    async fn test_multi_tenant_section_fans_out_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryLog::new(TOPIC, 1));
        let store = Arc::new(ObjectBlockStore::new(Arc::new(InMemory::new())));
        let mut worker = test_worker(log.clone(), store.clone(), tmp.path()).await;

        let now = now_ms();
        produce_trace(&log, "tenant-a", "trace-1", now);
        produce_trace(&log, "tenant-b", "trace-2", now + 1);

        worker.consume_partition(0, now_ms()).await.unwrap();
        assert_eq!(store.block_metas("tenant-a").await.len(), 1);
        assert_eq!(store.block_metas("tenant-b").await.len(), 1);
    }
}
