//! Tenant context for scoped operations.
//!
//! This module defines [`TenantContext`], the tenant identity handed to every
//! tenant scope. A context can only be built from a validated [`TenantId`],
//! so an invalid identifier never reaches the connection pool.

use super::id::TenantId;
use crate::error::ValidationError;

/// A validated tenant context required for all tenant-scoped operations.
///
/// Besides the tenant identity the context carries optional request metadata
/// that is recorded on the scope's tracing span.
///
/// ```
/// use ehr_persistence::tenant::{TenantContext, TenantId};
///
/// let ctx = TenantContext::new(TenantId::parse("acme").unwrap())
///     .with_correlation_id("req-42");
/// assert_eq!(ctx.tenant_id().as_str(), "acme");
/// assert_eq!(ctx.correlation_id(), Some("req-42"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
    correlation_id: Option<String>,
    user_id: Option<String>,
}

impl TenantContext {
    /// Creates a new tenant context for the given tenant.
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            correlation_id: None,
            user_id: None,
        }
    }

    /// Parses a raw tenant identifier and creates a context for it.
    pub fn parse(tenant_id: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(TenantId::parse(tenant_id)?))
    }

    /// Creates a context addressing the shared reference-data schema.
    pub fn system() -> Self {
        Self::new(TenantId::system())
    }

    /// Returns a builder for constructing a context.
    pub fn builder() -> TenantContextBuilder {
        TenantContextBuilder::default()
    }

    /// Sets the correlation ID for tracing.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the user ID for auditing.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Returns the tenant ID.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the correlation ID, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Returns the user ID, if set.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Returns `true` if this is the system tenant context.
    pub fn is_system(&self) -> bool {
        self.tenant_id.is_system()
    }
}

/// Builder for [`TenantContext`].
#[derive(Debug, Default)]
pub struct TenantContextBuilder {
    tenant_id: Option<String>,
    correlation_id: Option<String>,
    user_id: Option<String>,
}

impl TenantContextBuilder {
    /// Sets the raw tenant identifier; it is validated by [`build`](Self::build).
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the correlation ID.
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the user ID.
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Builds the context.
    ///
    /// # Errors
    ///
    /// Returns an error if no tenant ID was set or if it is invalid.
    pub fn build(self) -> Result<TenantContext, ValidationError> {
        let raw = self
            .tenant_id
            .ok_or_else(|| ValidationError::MissingRequiredField {
                field: "tenant_id".to_string(),
            })?;

        Ok(TenantContext {
            tenant_id: TenantId::parse(&raw)?,
            correlation_id: self.correlation_id,
            user_id: self.user_id,
        })
    }
}
