//! Tenant schema lifecycle.
//!
//! Onboarding creates a tenant's schema and its full table set; offboarding
//! drops it. These operations run outside the request path, from
//! administrative tooling and test harnesses.

use std::fmt;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::tenant::TenantId;

/// Result of provisioning a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The schema did not exist and was created at the current version.
    Created,
    /// The schema already existed at the current version; nothing changed.
    AlreadyProvisioned,
    /// The schema existed at an older version and was upgraded.
    Migrated {
        /// Version found before provisioning.
        from: i32,
        /// Version after provisioning.
        to: i32,
    },
}

impl fmt::Display for ProvisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionOutcome::Created => write!(f, "created"),
            ProvisionOutcome::AlreadyProvisioned => write!(f, "already provisioned"),
            ProvisionOutcome::Migrated { from, to } => write!(f, "migrated v{} -> v{}", from, to),
        }
    }
}

/// Creation and removal of tenant schemas.
///
/// Provisioning is idempotent: running it for a tenant that already exists
/// never touches existing rows. A tenant scope over an unprovisioned tenant
/// fails with [`TenantError::NotProvisioned`](crate::error::TenantError::NotProvisioned);
/// nothing in the request path creates schemas on demand.
#[async_trait]
pub trait SchemaLifecycle: Send + Sync {
    /// Creates the shared reference-data schema if it does not exist.
    async fn init_shared_schema(&self) -> StorageResult<()>;

    /// Creates the tenant's schema and table set, or upgrades it.
    async fn provision_tenant(&self, tenant_id: &TenantId) -> StorageResult<ProvisionOutcome>;

    /// Irreversibly drops the tenant's schema and all of its data.
    async fn deprovision_tenant(&self, tenant_id: &TenantId) -> StorageResult<()>;

    /// Returns `true` if the tenant's schema exists.
    async fn is_provisioned(&self, tenant_id: &TenantId) -> StorageResult<bool>;

    /// Returns the recorded schema version, or `None` if not provisioned.
    async fn schema_version(&self, tenant_id: &TenantId) -> StorageResult<Option<i32>>;

    /// Lists every tenant that has a schema, in schema-name order.
    async fn list_tenants(&self) -> StorageResult<Vec<TenantId>>;
}
