//! Shared reference data.
//!
//! Code systems live in the shared schema. Tenant scopes can read them
//! through the search path fallback; only a shared scope
//! ([`TenantPool::with_shared`](crate::backends::postgres::TenantPool::with_shared))
//! may write them.

use serde::{Deserialize, Serialize};

use super::column;
use crate::core::TenantExecutor;
use crate::error::{StorageResult, ValidationError};

/// One coded concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSystemEntry {
    /// Code system URI, e.g. `http://loinc.org`.
    pub system: String,
    /// Code within the system.
    pub code: String,
    /// Human-readable name.
    pub display: String,
}

impl CodeSystemEntry {
    /// Creates an entry.
    pub fn new(
        system: impl Into<String>,
        code: impl Into<String>,
        display: impl Into<String>,
    ) -> Self {
        Self {
            system: system.into(),
            code: code.into(),
            display: display.into(),
        }
    }
}

/// Code system lookups.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeSystemRepository;

impl CodeSystemRepository {
    /// Inserts or replaces an entry. Requires a shared scope.
    pub async fn upsert(exec: &dyn TenantExecutor, entry: &CodeSystemEntry) -> StorageResult<()> {
        if !exec.tenant_id().is_system() {
            return Err(ValidationError::InvalidConfiguration {
                message: format!(
                    "reference data is read-only for tenant {}",
                    exec.tenant_id()
                ),
            }
            .into());
        }

        exec.execute(
            "INSERT INTO code_systems (system, code, display) VALUES ($1, $2, $3)
             ON CONFLICT (system, code) DO UPDATE SET display = EXCLUDED.display",
            &[&entry.system, &entry.code, &entry.display],
        )
        .await?;
        Ok(())
    }

    /// Looks up a code.
    pub async fn lookup(
        exec: &dyn TenantExecutor,
        system: &str,
        code: &str,
    ) -> StorageResult<Option<CodeSystemEntry>> {
        let row = exec
            .query_opt(
                "SELECT system, code, display FROM code_systems WHERE system = $1 AND code = $2",
                &[&system, &code],
            )
            .await?;

        row.map(|row| {
            Ok(CodeSystemEntry {
                system: column(&row, "system")?,
                code: column(&row, "code")?,
                display: column(&row, "display")?,
            })
        })
        .transpose()
    }
}
