//! Partition Ring and Assignment Resolution
//!
//! The partition ring is owned by the wider control plane; the builder only
//! reads it. [`assigned_active_partitions`] intersects the static
//! configuration with the live ring so a stale config cannot make the
//! builder write blocks for partitions that no longer exist.

use std::collections::BTreeMap;

/// Lifecycle state of a partition in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// Provisioned but not yet receiving writes
    Pending,
    /// Receiving writes; eligible for consumption
    Active,
    /// Being drained out of the ring
    Inactive,
}

/// Ring entry for one partition.
#[derive(Debug, Clone)]
pub struct PartitionDesc {
    pub state: PartitionState,
}

/// Snapshot of the partition ring.
#[derive(Debug, Clone, Default)]
pub struct PartitionRing {
    partitions: BTreeMap<i32, PartitionDesc>,
}

impl PartitionRing {
    pub fn new(partitions: BTreeMap<i32, PartitionDesc>) -> Self {
        Self { partitions }
    }

    pub fn active_partitions_count(&self) -> usize {
        self.partitions
            .values()
            .filter(|desc| desc.state == PartitionState::Active)
            .count()
    }

    pub fn partition(&self, id: i32) -> Option<&PartitionDesc> {
        self.partitions.get(&id)
    }
}

/// Read access to the live partition ring.
pub trait PartitionRingReader: Send + Sync {
    fn partition_ring(&self) -> PartitionRing;
}

/// Ring reader over a fixed snapshot, for tests and single-node setups.
#[derive(Debug, Clone)]
pub struct StaticPartitionRingReader {
    ring: PartitionRing,
}

impl StaticPartitionRingReader {
    pub fn new(ring: PartitionRing) -> Self {
        Self { ring }
    }

    /// Convenience constructor: the given partitions, all active.
    pub fn with_active_partitions(ids: &[i32]) -> Self {
        let partitions = ids
            .iter()
            .map(|id| {
                (
                    *id,
                    PartitionDesc {
                        state: PartitionState::Active,
                    },
                )
            })
            .collect();
        Self::new(PartitionRing::new(partitions))
    }
}

impl PartitionRingReader for StaticPartitionRingReader {
    fn partition_ring(&self) -> PartitionRing {
        self.ring.clone()
    }
}

/// Filter statically assigned partitions against the live ring.
///
/// A partition survives only if its ring entry is `Active` and its id does
/// not exceed the ring's active partition count.
pub fn assigned_active_partitions(assigned: &[i32], ring: &PartitionRing) -> Vec<i32> {
    let active_count = ring.active_partitions_count() as i32;
    assigned
        .iter()
        .copied()
        .filter(|id| {
            *id <= active_count
                && ring
                    .partition(*id)
                    .is_some_and(|desc| desc.state == PartitionState::Active)
        })
        .collect()
}
