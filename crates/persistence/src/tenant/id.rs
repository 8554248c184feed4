//! Tenant identifier type.
//!
//! This module defines the [`TenantId`] type, a validated identifier for
//! tenants. Tenant ids are used to derive schema names, so they are restricted
//! to a small character set and stored in a canonical (lowercase) form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

/// The system tenant identifier, used for the shared reference-data schema.
///
/// It can never be produced by [`TenantId::parse`], so no registered tenant
/// can claim it.
pub const SYSTEM_TENANT: &str = "__system__";

/// Maximum length of a tenant identifier.
///
/// Together with the default `tenant_` prefix this keeps every derived schema
/// name well inside PostgreSQL's 63-byte identifier limit.
pub const MAX_TENANT_ID_LENGTH: usize = 48;

/// A validated tenant identifier.
///
/// # Format
///
/// - ASCII letters are folded to lowercase before validation
/// - 1 to 48 characters from `[a-z0-9-]`
/// - the first character is a letter
/// - no trailing `-` and no `--` run
///
/// `_` is deliberately absent from the alphabet: schema names replace `-`
/// with `_`, and excluding `_` keeps that mapping one-to-one.
///
/// # Examples
///
/// ```
/// use ehr_persistence::tenant::TenantId;
///
/// let tenant = TenantId::parse("Acme-Clinic").unwrap();
/// assert_eq!(tenant.as_str(), "acme-clinic");
///
/// assert!(TenantId::parse("acme_clinic").is_err());
/// assert!(TenantId::parse("").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Parses and canonicalizes a tenant identifier.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let canonical = input.to_ascii_lowercase();
        validate(&canonical).map_err(|reason| ValidationError::InvalidTenantId {
            input: input.to_string(),
            reason: reason.to_string(),
        })?;
        Ok(Self(canonical))
    }

    /// Returns the system tenant ID.
    ///
    /// The system tenant addresses the shared schema holding cross-tenant
    /// reference data.
    pub fn system() -> Self {
        Self(SYSTEM_TENANT.to_string())
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this is the system tenant.
    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_TENANT
    }
}

fn validate(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("must not be empty");
    }
    if id.len() > MAX_TENANT_ID_LENGTH {
        return Err("must be at most 48 characters");
    }
    if let Some(c) = id.chars().find(|c| !matches!(c, 'a'..='z' | '0'..='9' | '-')) {
        return Err(if c == '_' {
            "underscore is not allowed, use '-' as separator"
        } else {
            "only letters, digits and '-' are allowed"
        });
    }
    if !id.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err("must start with a letter");
    }
    if id.ends_with('-') {
        return Err("must not end with '-'");
    }
    if id.contains("--") {
        return Err("must not contain consecutive '-'");
    }
    Ok(())
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for TenantId {
    type Error = ValidationError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TenantId::parse(&raw).map_err(serde::de::Error::custom)
    }
}
