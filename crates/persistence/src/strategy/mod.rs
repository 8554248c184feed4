//! Tenancy strategy.
//!
//! Tenants are isolated by PostgreSQL schema: every tenant owns one schema
//! holding the full clinical table set, and a shared schema holds
//! cross-tenant reference data. [`SchemaPerTenantStrategy`] is the single
//! source of truth for how a [`TenantId`](crate::tenant::TenantId) maps to a
//! schema and for the SQL that binds a connection to it.
//!
//! # Example
//!
//! ```
//! use ehr_persistence::strategy::{SchemaPerTenantConfig, SchemaPerTenantStrategy};
//! use ehr_persistence::tenant::TenantId;
//!
//! let strategy = SchemaPerTenantStrategy::new(
//!     SchemaPerTenantConfig::new().with_prefix("clinic_"),
//! )
//! .unwrap();
//!
//! let schema = strategy.schema_for(&TenantId::parse("north").unwrap());
//! assert_eq!(schema.as_str(), "clinic_north");
//! ```

mod schema_per_tenant;

pub(crate) use schema_per_tenant::quote_identifier;
pub use schema_per_tenant::{SchemaName, SchemaPerTenantConfig, SchemaPerTenantStrategy};
