//! Block Store
//!
//! The `WriteBlock` seam between the block-builder and long-term storage.
//! The builder only ever appends whole blocks; queries and compaction live
//! elsewhere and read the same layout.
//!
//! ## Overwrite Semantics
//!
//! `write_block` must be an upsert keyed by block id. The builder depends on
//! this: a cycle reprocessed after a flush or commit failure regenerates the
//! same deterministic id, and the rewritten block replaces the earlier
//! attempt. Object stores give this for free (a PUT to the same path
//! replaces the object); the metadata registry mirrors it by keying on id.
//!
//! ## Layout
//!
//! ```text
//! blocks/{tenant}/{block id}/meta.json
//! blocks/{tenant}/{block id}/data.bin
//! blocks/{tenant}/{block id}/index.bin
//! blocks/{tenant}/{block id}/bloom.bin
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::debug;
use uuid::Uuid;

use crate::block::{BlockMeta, EncodedBlock};
use crate::error::Result;

/// Writer interface to long-term block storage.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Durably write one block. Writing a block with an id that already
    /// exists replaces it.
    async fn write_block(&self, block: &EncodedBlock) -> Result<()>;

    /// Metadata of all blocks currently stored for a tenant.
    async fn block_metas(&self, tenant: &str) -> Vec<BlockMeta>;
}

/// Block store over any `object_store` backend.
pub struct ObjectBlockStore {
    store: Arc<dyn ObjectStore>,
    metas: RwLock<HashMap<String, BTreeMap<Uuid, BlockMeta>>>,
}

impl ObjectBlockStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            metas: RwLock::new(HashMap::new()),
        }
    }

    fn block_path(tenant: &str, id: &Uuid, file: &str) -> Path {
        Path::from(format!("blocks/{tenant}/{id}/{file}"))
    }
}

#[async_trait]
impl BlockStore for ObjectBlockStore {
    async fn write_block(&self, block: &EncodedBlock) -> Result<()> {
        let meta = &block.meta;
        let meta_json = serde_json::to_vec(meta)?;

        self.store
            .put(
                &Self::block_path(&meta.tenant, &meta.id, "data.bin"),
                PutPayload::from(block.data.clone()),
            )
            .await?;
        self.store
            .put(
                &Self::block_path(&meta.tenant, &meta.id, "index.bin"),
                PutPayload::from(block.index.clone()),
            )
            .await?;
        self.store
            .put(
                &Self::block_path(&meta.tenant, &meta.id, "bloom.bin"),
                PutPayload::from(block.bloom.clone()),
            )
            .await?;
        // Meta is written last so a block is only discoverable once its data
        // is in place.
        self.store
            .put(
                &Self::block_path(&meta.tenant, &meta.id, "meta.json"),
                PutPayload::from(meta_json),
            )
            .await?;

        self.metas
            .write()
            .expect("meta registry poisoned")
            .entry(meta.tenant.clone())
            .or_default()
            .insert(meta.id, meta.clone());

        debug!(
            tenant = %meta.tenant,
            block = %meta.id,
            objects = meta.total_objects,
            size = meta.size_bytes,
            "Block written"
        );
        Ok(())
    }

    async fn block_metas(&self, tenant: &str) -> Vec<BlockMeta> {
        self.metas
            .read()
            .expect("meta registry poisoned")
            .get(tenant)
            .map(|blocks| blocks.values().cloned().collect())
            .unwrap_or_default()
    }
}
