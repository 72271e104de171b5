//! Partition Section Writer
//!
//! One section writer exists per partition-cycle pair. It groups incoming
//! decoded traces by tenant into WAL-backed aggregators and, when the cycle
//! closes, seals one block per tenant.
//!
//! ## Deterministic Flush
//!
//! The block id for each tenant is derived from `(partition, cycle end,
//! tenant)` at flush time. Flushing the same section twice, for example
//! after a commit failure forces the records to be reconsumed, produces
//! byte-identical ids, so the second write overwrites the first in the
//! store. Partial flush progress is therefore harmless: whatever already
//! landed is rewritten under the same id on retry.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use tracehouse_core::PushRequest;
use tracehouse_storage::{
    deterministic_block_id, BlockConfig, BlockStore, TenantWal, VersionedEncoding, Wal,
};

use crate::overrides::Overrides;

/// Accumulates one partition-cycle section and seals it into blocks.
pub(crate) struct SectionWriter {
    partition: i32,
    start_offset: i64,
    cycle_end: u64,
    cfg: BlockConfig,
    enc: VersionedEncoding,
    overrides: Arc<dyn Overrides>,
    wal: Wal,
    tenants: BTreeMap<String, TenantWal>,
}

impl SectionWriter {
    pub(crate) fn new(
        partition: i32,
        start_offset: i64,
        cycle_end: u64,
        cfg: BlockConfig,
        enc: VersionedEncoding,
        overrides: Arc<dyn Overrides>,
        wal: Wal,
    ) -> Self {
        Self {
            partition,
            start_offset,
            cycle_end,
            cfg,
            enc,
            overrides,
            wal,
            tenants: BTreeMap::new(),
        }
    }

    /// Buffer one decoded push request for a tenant. The tenant's aggregator
    /// and its WAL file are created on the first record for that tenant.
    pub(crate) async fn push_bytes(
        &mut self,
        tenant: &str,
        req: &PushRequest,
        timestamp: u64,
    ) -> tracehouse_storage::Result<()> {
        if !self.tenants.contains_key(tenant) {
            let section = self
                .wal
                .create_section(tenant, self.partition, self.start_offset)
                .await?;
            self.tenants.insert(tenant.to_string(), section);
        }
        let aggregator = self
            .tenants
            .get_mut(tenant)
            .expect("tenant aggregator just inserted");

        for entry in &req.entries {
            aggregator
                .append_trace(entry.trace_id.clone(), entry.payload.clone(), timestamp)
                .await?;
        }
        Ok(())
    }

    /// Seal and write one block per tenant, releasing WAL files as blocks
    /// land. An error aborts the flush; remaining tenants keep their WAL
    /// files on disk until the process-exit sweep, and the next cycle
    /// rebuilds them from the log.
    pub(crate) async fn flush(&mut self, store: &dyn BlockStore) -> tracehouse_storage::Result<()> {
        for (tenant, section) in std::mem::take(&mut self.tenants) {
            let block_id = deterministic_block_id(self.partition, self.cycle_end, &tenant);
            let block = section.complete(
                self.enc,
                &self.cfg,
                block_id,
                self.partition,
                self.start_offset,
                self.overrides.dedicated_columns(&tenant),
            )?;
            let objects = block.meta.total_objects;

            store.write_block(&block).await?;
            section.release().await?;

            info!(
                tenant = %tenant,
                block = %block_id,
                partition = self.partition,
                objects,
                "Block flushed"
            );
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn tenant_count(&self) -> usize {
        self.tenants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::memory::InMemory;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracehouse_core::TraceEntry;
    use tracehouse_storage::{EncodedBlock, ObjectBlockStore, WalConfig};

    use crate::overrides::NoopOverrides;

    async fn new_writer(dir: &std::path::Path, partition: i32, cycle_end: u64) -> SectionWriter {
        let wal = Wal::open(&WalConfig {
            filepath: dir.to_path_buf(),
        })
        .await
        .unwrap();
        SectionWriter::new(
            partition,
            0,
            cycle_end,
            BlockConfig::default(),
            VersionedEncoding::V1,
            Arc::new(NoopOverrides),
            wal,
        )
    }

    fn req(trace_id: &str, parts: usize) -> PushRequest {
        PushRequest {
            entries: (0..parts)
                .map(|i| TraceEntry {
                    trace_id: Bytes::copy_from_slice(trace_id.as_bytes()),
                    payload: Bytes::from(format!("part-{i}")),
                })
                .collect(),
        }
    }

    /// Store decorator failing a configurable number of writes.
    struct FailingStore {
        inner: ObjectBlockStore,
        remaining_failures: AtomicU32,
    }

    #[async_trait::async_trait]
    impl BlockStore for FailingStore {
        async fn write_block(&self, block: &EncodedBlock) -> tracehouse_storage::Result<()> {
            if self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(tracehouse_storage::Error::Encoding(
                    "injected write failure".to_string(),
                ));
            }
            self.inner.write_block(block).await
        }

        async fn block_metas(&self, tenant: &str) -> Vec<tracehouse_storage::BlockMeta> {
            self.inner.block_metas(tenant).await
        }
    }

    #[tokio::test]
    async fn test_flush_emits_one_block_per_tenant() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = new_writer(tmp.path(), 0, 10_000).await;
        let store = ObjectBlockStore::new(Arc::new(InMemory::new()));

        writer.push_bytes("tenant-a", &req("trace-1", 2), 100).await.unwrap();
        writer.push_bytes("tenant-a", &req("trace-2", 1), 110).await.unwrap();
        writer.push_bytes("tenant-b", &req("trace-3", 1), 120).await.unwrap();
        assert_eq!(writer.tenant_count(), 2);

        writer.flush(&store).await.unwrap();

        let a = store.block_metas("tenant-a").await;
        let b = store.block_metas("tenant-b").await;
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].total_objects, 2);
        assert_eq!(b[0].total_objects, 1);
        assert_eq!(a[0].id, deterministic_block_id(0, 10_000, "tenant-a"));
    }

    #[tokio::test]
    async fn test_same_trace_id_aggregates() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = new_writer(tmp.path(), 0, 10_000).await;
        let store = ObjectBlockStore::new(Arc::new(InMemory::new()));

        // Ten pushes of the same trace id collapse into one trace aggregate.
        for i in 0..10 {
            writer
                .push_bytes("tenant-a", &req("trace-same", 1), 100 + i)
                .await
                .unwrap();
        }
        writer.flush(&store).await.unwrap();

        let metas = store.block_metas("tenant-a").await;
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].total_objects, 1);
    }

    #[tokio::test]
    async fn test_reflush_overwrites_same_block() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ObjectBlockStore::new(Arc::new(InMemory::new()));

        // Two writers over the same partition-cycle pair, as after a commit
        // failure forces reconsumption.
        for _ in 0..2 {
            let mut writer = new_writer(tmp.path(), 0, 10_000).await;
            writer.push_bytes("tenant-a", &req("trace-1", 1), 100).await.unwrap();
            writer.flush(&store).await.unwrap();
        }

        assert_eq!(store.block_metas("tenant-a").await.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_failure_leaves_wal_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = new_writer(tmp.path(), 0, 10_000).await;
        let store = FailingStore {
            inner: ObjectBlockStore::new(Arc::new(InMemory::new())),
            remaining_failures: AtomicU32::new(1),
        };

        writer.push_bytes("tenant-a", &req("trace-1", 1), 100).await.unwrap();
        assert!(writer.flush(&store).await.is_err());

        // The section file survives the failed flush for postmortem.
        let wal_files: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "wal"))
            .collect();
        assert_eq!(wal_files.len(), 1);
        assert!(store.block_metas("tenant-a").await.is_empty());
    }

    #[tokio::test]
    async fn test_wal_files_released_after_flush() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = new_writer(tmp.path(), 0, 10_000).await;
        let store = ObjectBlockStore::new(Arc::new(InMemory::new()));

        writer.push_bytes("tenant-a", &req("trace-1", 1), 100).await.unwrap();
        writer.flush(&store).await.unwrap();

        let wal_files = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "wal"))
            .count();
        assert_eq!(wal_files, 0);
    }
}
