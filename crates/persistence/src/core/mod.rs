//! Core traits and abstractions.
//!
//! - [`TenantExecutor`] - Statement execution bound to one tenant schema
//! - [`SchemaLifecycle`] - Tenant onboarding and offboarding
//! - [`TransactionOptions`] - Per-call transaction settings
//!
//! Repositories depend only on [`TenantExecutor`]; they never see a pool or
//! an unbound connection.

pub mod executor;
pub mod lifecycle;
pub mod transaction;

pub use executor::{SqlParams, TenantExecutor};
pub use lifecycle::{ProvisionOutcome, SchemaLifecycle};
pub use transaction::{IsolationLevel, TransactionOptions};
