//! Multitenancy tests.
//!
//! Data isolation between tenants, cross-tenant reference rejection, the
//! scope's release guarantees and the schema lifecycle.

pub mod cross_tenant_tests;
pub mod isolation_tests;
pub mod lifecycle_tests;
pub mod scope_tests;
