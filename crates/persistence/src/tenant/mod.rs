//! Tenant identity for multi-tenant EHR storage.
//!
//! Every tenant-scoped operation starts from a [`TenantContext`], which can
//! only be built from a validated [`TenantId`]. Invalid identifiers are
//! rejected here, before any connection is acquired.
//!
//! # Examples
//!
//! ```
//! use ehr_persistence::tenant::{TenantContext, TenantId};
//!
//! let ctx = TenantContext::new(TenantId::parse("st-marys").unwrap());
//! assert_eq!(ctx.tenant_id().as_str(), "st-marys");
//!
//! // Shared reference data
//! let system = TenantContext::system();
//! assert!(system.is_system());
//! ```

mod context;
mod id;

pub use context::{TenantContext, TenantContextBuilder};
pub use id::{MAX_TENANT_ID_LENGTH, SYSTEM_TENANT, TenantId};
