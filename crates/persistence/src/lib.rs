//! Schema-per-tenant persistence for a multi-tenant EHR.
//!
//! One PostgreSQL database serves every tenant. Each tenant owns a schema
//! holding the full, identical set of clinical tables; a shared schema holds
//! cross-tenant reference data such as code systems.
//!
//! # Architecture
//!
//! - [`tenant`] - Validated tenant identifiers and the tenant context
//! - [`strategy`] - Tenant to schema naming and the SQL that binds a session
//! - [`core`] - The executor, transaction and lifecycle contracts
//! - [`backends`] - The PostgreSQL pool, tenant scope and schema lifecycle
//! - [`repository`] - Tenant-scoped repositories built on the executor
//! - [`error`] - Error types and their kinds
//!
//! # Tenant scope
//!
//! All tenant data is reached through
//! [`TenantPool::with_tenant`](backends::postgres::TenantPool::with_tenant).
//! The scope acquires a pooled connection, binds its `search_path` to the
//! tenant schema, runs the unit of work and unbinds the connection before it
//! goes back to the pool, whether the work succeeded, failed, panicked or was
//! cancelled.
//!
//! ```no_run
//! use ehr_persistence::backends::postgres::{PostgresConfig, TenantPool};
//! use ehr_persistence::core::SchemaLifecycle;
//! use ehr_persistence::repository::{NewPatient, PatientRepository};
//! use ehr_persistence::{StorageError, TenantContext};
//!
//! # async fn example() -> Result<(), StorageError> {
//! let pool = TenantPool::new(PostgresConfig::from_env()).await?;
//! pool.init_shared_schema().await?;
//!
//! let ctx = TenantContext::parse("st-marys")?;
//! pool.provision_tenant(ctx.tenant_id()).await?;
//!
//! let patient = pool
//!     .with_tenant(&ctx, |conn| {
//!         Box::pin(async move {
//!             PatientRepository::create(&*conn, &NewPatient::new("MRN-001", "Lovelace")).await
//!         })
//!     })
//!     .await?;
//! println!("created patient {}", patient.id);
//! # Ok(())
//! # }
//! ```
//!
//! # Tenant identifiers
//!
//! ```
//! use ehr_persistence::strategy::{SchemaPerTenantConfig, SchemaPerTenantStrategy};
//! use ehr_persistence::tenant::TenantId;
//!
//! let strategy = SchemaPerTenantStrategy::new(SchemaPerTenantConfig::default()).unwrap();
//!
//! let tenant = TenantId::parse("St-Marys").unwrap();
//! assert_eq!(tenant.as_str(), "st-marys");
//! assert_eq!(strategy.schema_for(&tenant).as_str(), "tenant_st_marys");
//!
//! assert!(TenantId::parse("st_marys").is_err());
//! assert!(TenantId::parse("st-marys; DROP SCHEMA shared").is_err());
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod core;
pub mod error;
pub mod repository;
pub mod strategy;
pub mod tenant;

// Re-export commonly used types at crate root
pub use error::{ErrorKind, StorageError, StorageResult};
pub use tenant::{TenantContext, TenantId};

// Re-export core traits
pub use core::{SchemaLifecycle, TenantExecutor, TransactionOptions};

pub use backends::postgres::{PostgresConfig, ScopeOptions, TenantConnection, TenantPool};
pub use strategy::{SchemaName, SchemaPerTenantConfig, SchemaPerTenantStrategy};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
