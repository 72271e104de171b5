//! Per-tenant overrides consumed by block creation.

use tracehouse_storage::DedicatedColumn;

/// Tenant-specific settings the builder reads at flush time.
pub trait Overrides: Send + Sync {
    /// Schema extensions to record in blocks cut for this tenant.
    fn dedicated_columns(&self, tenant: &str) -> Vec<DedicatedColumn>;
}

/// Overrides source with no per-tenant settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOverrides;

impl Overrides for NoopOverrides {
    fn dedicated_columns(&self, _tenant: &str) -> Vec<DedicatedColumn> {
        Vec::new()
    }
}
