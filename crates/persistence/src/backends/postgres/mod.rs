//! PostgreSQL backend implementation.
//!
//! This module provides the schema-per-tenant isolation layer on top of a
//! deadpool-postgres connection pool.
//!
//! # Features
//!
//! - One explicitly owned [`TenantPool`] shared by all tenants
//! - [`TenantPool::with_tenant`]: the only path to tenant data
//! - Typed connection states: unbound connections expose no statements
//! - Guaranteed session reset (or connection discard) on every exit
//! - Deadlines and cancellation for acquisition and execution
//! - Transactions with configurable isolation levels
//! - Idempotent tenant provisioning via [`SchemaLifecycle`](crate::core::SchemaLifecycle)
//!
//! # Example
//!
//! ```no_run
//! use ehr_persistence::backends::postgres::{PostgresConfig, TenantPool};
//! use ehr_persistence::core::{SchemaLifecycle, TenantExecutor};
//! use ehr_persistence::error::StorageError;
//! use ehr_persistence::tenant::{TenantContext, TenantId};
//!
//! # async fn main_example() -> Result<(), StorageError> {
//! let pool = TenantPool::new(PostgresConfig::default()).await?;
//!
//! // Onboarding, normally done by administrative tooling
//! pool.init_shared_schema().await?;
//! pool.provision_tenant(&TenantId::parse("acme")?).await?;
//!
//! let ctx = TenantContext::parse("acme")?;
//! let count: i64 = pool
//!     .with_tenant(&ctx, |conn| {
//!         Box::pin(async move {
//!             let row = conn.query_one("SELECT count(*) FROM patients", &[]).await?;
//!             Ok::<_, StorageError>(row.get(0))
//!         })
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! Every tenant schema holds the same clinical table set; see
//! [`schema::tenant_tables`]. The shared schema holds `code_systems`.

mod config;
mod guard;
mod lifecycle;
mod pool;
pub mod schema;
mod scope;
mod transaction;

pub use config::{PostgresConfig, PostgresSslMode};
pub use pool::{PoolStatus, TenantPool};
pub use scope::{ScopeOptions, TenantConnection};
pub use transaction::TenantTransaction;
