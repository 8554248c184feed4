//! Tenant-scoped repositories.
//!
//! Repositories are stateless: every operation takes a [`TenantExecutor`]
//! that is already bound to a tenant (a [`TenantConnection`] or a
//! [`TenantTransaction`]) and issues unqualified SQL against it. They never
//! touch the session's schema binding.
//!
//! ```no_run
//! use ehr_persistence::backends::postgres::TenantPool;
//! use ehr_persistence::error::StorageError;
//! use ehr_persistence::repository::{NewPatient, PatientFilter, PatientRepository};
//! use ehr_persistence::tenant::TenantContext;
//!
//! # async fn example(pool: TenantPool) -> Result<(), StorageError> {
//! let ctx = TenantContext::parse("st-marys")?;
//! let count = pool
//!     .with_tenant(&ctx, |conn| {
//!         Box::pin(async move {
//!             PatientRepository::create(&*conn, &NewPatient::new("MRN-1", "Lovelace")).await?;
//!             PatientRepository::count(&*conn, &PatientFilter::default()).await
//!         })
//!     })
//!     .await?;
//! assert_eq!(count, 1);
//! # Ok(())
//! # }
//! ```
//!
//! [`TenantExecutor`]: crate::core::TenantExecutor
//! [`TenantConnection`]: crate::backends::postgres::TenantConnection
//! [`TenantTransaction`]: crate::backends::postgres::TenantTransaction

mod encounter;
mod filter;
mod patient;
mod reference;

pub use encounter::{
    Encounter, EncounterFilter, EncounterRepository, EncounterStatus, NewEncounter,
};
pub use filter::{BoxedParam, FilterBuilder, escape_like};
pub use patient::{NewPatient, Patient, PatientFilter, PatientRepository};
pub use reference::{CodeSystemEntry, CodeSystemRepository};

use tokio_postgres::Row;
use tokio_postgres::types::FromSql;

use crate::error::{BackendError, ResourceError, StorageError, StorageResult};

/// Reads a column, mapping type mismatches to [`BackendError::Decode`].
pub(crate) fn column<'r, T>(row: &'r Row, name: &str) -> StorageResult<T>
where
    T: FromSql<'r>,
{
    row.try_get(name).map_err(|e| {
        StorageError::Backend(BackendError::Decode {
            column: name.to_string(),
            message: e.to_string(),
        })
    })
}

pub(crate) fn not_found(entity: &str, id: impl ToString) -> StorageError {
    StorageError::Resource(ResourceError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    })
}
