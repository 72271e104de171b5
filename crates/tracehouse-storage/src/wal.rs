//! Write-Ahead Scratch Buffers for In-Flight Sections
//!
//! While a consumption cycle is open, decoded traces accumulate in memory
//! grouped by tenant. Each tenant's aggregator is backed by an append-only
//! WAL file on local disk, so an operator inspecting a wedged builder can
//! see exactly what the in-flight section contained.
//!
//! ## Lifecycle
//!
//! - [`Wal::open`] runs once at service startup: it creates the directory
//!   and sweeps section files abandoned by a previous process. Nothing in
//!   them is lost; the records they buffered were never committed to the
//!   log, so the consume loop re-reads them from the committed offset.
//! - [`Wal::create_section`] opens one file per `(partition, start offset,
//!   tenant)` when the section writer sees the first record for a tenant.
//! - [`TenantWal::release`] deletes the file after its block has been
//!   written durably. On flush failure the file is simply left behind for
//!   the startup sweep; the next cycle opens a fresh section.
//!
//! ## Entry Format
//!
//! ```text
//! ┌────────────┬──────────┬───────────┬──────────┬──────────┬──────────────┬─────────┐
//! │ Entry Size │ CRC32    │ Timestamp │ Id Size  │ Trace Id │ Payload Size │ Payload │
//! │ (4 B LE)   │ (4 B LE) │ (8 B LE)  │ (4 B LE) │ (N B)    │ (4 B LE)     │ (M B)   │
//! └────────────┴──────────┴───────────┴──────────┴──────────┴──────────────┴─────────┘
//! ```
//!
//! The CRC covers everything after the checksum field.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::block::{BlockMeta, DedicatedColumn, EncodedBlock};
use crate::config::{BlockConfig, WalConfig};
use crate::encoding::{BlockWriter, VersionedEncoding};
use crate::error::{Error, Result};

/// Handle on the WAL directory.
#[derive(Debug, Clone)]
pub struct Wal {
    dir: PathBuf,
}

impl Wal {
    /// Open the WAL directory, sweeping section files left behind by a
    /// previous process.
    pub async fn open(cfg: &WalConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&cfg.filepath).await?;

        let mut swept = 0usize;
        let mut entries = tokio::fs::read_dir(&cfg.filepath).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "wal") {
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    warn!(path = ?path, error = %err, "Failed to sweep abandoned section file");
                } else {
                    swept += 1;
                }
            }
        }
        if swept > 0 {
            warn!(
                dir = ?cfg.filepath,
                swept,
                "Swept abandoned section files from a previous run"
            );
        }

        info!(dir = ?cfg.filepath, "WAL opened");
        Ok(Self {
            dir: cfg.filepath.clone(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open the section file for one tenant of one partition-cycle pair.
    pub async fn create_section(
        &self,
        tenant: &str,
        partition: i32,
        start_offset: i64,
    ) -> Result<TenantWal> {
        let filename = format!(
            "{}-{}-{}.wal",
            partition,
            start_offset,
            sanitize_tenant(tenant)
        );
        let path = self.dir.join(filename);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;

        debug!(tenant, partition, start_offset, path = ?path, "Section WAL created");

        Ok(TenantWal {
            tenant: tenant.to_string(),
            path,
            file,
            traces: BTreeMap::new(),
            bytes_written: 0,
            min_timestamp: u64::MAX,
            max_timestamp: 0,
        })
    }
}

/// Only path-safe characters end up in section file names.
fn sanitize_tenant(tenant: &str) -> String {
    tenant
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// WAL-backed trace aggregator for one tenant's in-flight section.
///
/// Traces pushed several times within one cycle merge under their trace id;
/// the object count of the sealed block counts distinct traces, not pushes.
pub struct TenantWal {
    tenant: String,
    path: PathBuf,
    file: File,
    traces: BTreeMap<Bytes, Vec<Bytes>>,
    bytes_written: u64,
    min_timestamp: u64,
    max_timestamp: u64,
}

impl TenantWal {
    /// Append one trace payload, durably noting it in the section file and
    /// merging it into the in-memory aggregation.
    pub async fn append_trace(
        &mut self,
        trace_id: Bytes,
        payload: Bytes,
        timestamp: u64,
    ) -> Result<()> {
        let id_size = trace_id.len() as u32;
        let payload_size = payload.len() as u32;
        let entry_size = 4 + 8 + 4 + id_size + 4 + payload_size;

        let mut buffer = Vec::with_capacity(entry_size as usize + 4);
        buffer.extend_from_slice(&entry_size.to_le_bytes());

        let mut crc = crc32fast::Hasher::new();
        crc.update(&timestamp.to_le_bytes());
        crc.update(&id_size.to_le_bytes());
        crc.update(&trace_id);
        crc.update(&payload_size.to_le_bytes());
        crc.update(&payload);
        buffer.extend_from_slice(&crc.finalize().to_le_bytes());

        buffer.extend_from_slice(&timestamp.to_le_bytes());
        buffer.extend_from_slice(&id_size.to_le_bytes());
        buffer.extend_from_slice(&trace_id);
        buffer.extend_from_slice(&payload_size.to_le_bytes());
        buffer.extend_from_slice(&payload);

        self.file.write_all(&buffer).await?;
        self.bytes_written += buffer.len() as u64;

        self.min_timestamp = self.min_timestamp.min(timestamp);
        self.max_timestamp = self.max_timestamp.max(timestamp);
        self.traces.entry(trace_id).or_default().push(payload);
        Ok(())
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Distinct traces aggregated so far.
    pub fn object_count(&self) -> u64 {
        self.traces.len() as u64
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Seal the aggregation into an encoded block under the given id.
    pub fn complete(
        &self,
        enc: VersionedEncoding,
        cfg: &BlockConfig,
        id: Uuid,
        partition: i32,
        start_offset: i64,
        dedicated_columns: Vec<DedicatedColumn>,
    ) -> Result<EncodedBlock> {
        if self.traces.is_empty() {
            return Err(Error::Encoding("cannot seal an empty section".to_string()));
        }

        let mut writer = BlockWriter::new(enc, cfg, self.traces.len());
        for (trace_id, parts) in &self.traces {
            writer.append_trace(trace_id, parts)?;
        }
        let sealed = writer.finish()?;

        Ok(EncodedBlock {
            meta: BlockMeta {
                id,
                tenant: self.tenant.clone(),
                partition,
                start_offset,
                total_objects: sealed.total_objects,
                version: enc.version().to_string(),
                compression: cfg.encoding,
                min_timestamp: self.min_timestamp,
                max_timestamp: self.max_timestamp,
                size_bytes: sealed.data.len() as u64,
                index_entries: sealed.index_entries,
                index_page_size_bytes: cfg.index_page_size_bytes,
                bloom_shards: sealed.bloom_shards,
                dedicated_columns,
            },
            data: sealed.data,
            bloom: sealed.bloom,
            index: sealed.index,
        })
    }

    /// Delete the section file after its block is durable.
    pub async fn release(self) -> Result<()> {
        drop(self.file);
        tokio::fs::remove_file(&self.path).await?;
        debug!(tenant = %self.tenant, path = ?self.path, "Section WAL released");
        Ok(())
    }
}
