//! Schema-per-tenant tenancy strategy.
//!
//! In this strategy, each tenant has a separate PostgreSQL schema.
//! This provides logical isolation while sharing the same database
//! and connection pool.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::tenant::TenantId;

/// Configuration for schema-per-tenant tenancy.
///
/// # Example
///
/// ```
/// use ehr_persistence::strategy::SchemaPerTenantConfig;
///
/// let config = SchemaPerTenantConfig {
///     schema_prefix: "tenant_".to_string(),
///     shared_schema: "shared".to_string(),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaPerTenantConfig {
    /// Prefix for tenant schema names.
    ///
    /// The full schema name is `{prefix}{tenant_id}` with `-` replaced by `_`.
    /// Changing it orphans every existing tenant schema.
    #[serde(default = "default_schema_prefix")]
    pub schema_prefix: String,

    /// Name of the shared schema for cross-tenant reference data.
    #[serde(default = "default_shared_schema")]
    pub shared_schema: String,

    /// Maximum schema name length (PostgreSQL limit is 63).
    #[serde(default = "default_max_schema_length")]
    pub max_schema_length: usize,
}

fn default_schema_prefix() -> String {
    "tenant_".to_string()
}

fn default_shared_schema() -> String {
    "shared".to_string()
}

fn default_max_schema_length() -> usize {
    63 // PostgreSQL identifier limit
}

impl Default for SchemaPerTenantConfig {
    fn default() -> Self {
        Self {
            schema_prefix: default_schema_prefix(),
            shared_schema: default_shared_schema(),
            max_schema_length: default_max_schema_length(),
        }
    }
}

impl SchemaPerTenantConfig {
    /// Creates a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the schema prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.schema_prefix = prefix.into();
        self
    }

    /// Sets the shared schema name.
    pub fn with_shared_schema(mut self, schema: impl Into<String>) -> Self {
        self.shared_schema = schema.into();
        self
    }
}

/// A physical schema name derived from a tenant identifier.
///
/// The name is a plain lowercase identifier. It is only ever interpolated
/// into SQL through [`SchemaName::quoted`]; as data it is passed as a bound
/// parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaName(String);

impl SchemaName {
    /// Returns the raw schema name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the schema name as a quoted SQL identifier.
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0)
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Schema-per-tenant tenancy strategy implementation.
///
/// This strategy uses PostgreSQL schemas to isolate tenant data.
/// Each tenant has its own schema, and the connection's `search_path`
/// is set to include the tenant's schema.
///
/// # Schema Naming
///
/// Tenant IDs are already canonical (lowercase, `[a-z0-9-]`), so the schema
/// name is the configured prefix followed by the id with `-` replaced by `_`.
/// Because tenant ids never contain `_`, the mapping is injective and can be
/// inverted with [`tenant_for_schema`](Self::tenant_for_schema).
///
/// # Search Path
///
/// For each scope, the search_path is set to:
/// ```sql
/// SET search_path TO "tenant_acme", "shared", public;
/// ```
///
/// This allows:
/// - Tenant-specific tables in the tenant schema
/// - Reference data (code systems) in the shared schema
/// - Extension functions in public
#[derive(Debug, Clone)]
pub struct SchemaPerTenantStrategy {
    config: SchemaPerTenantConfig,
}

impl SchemaPerTenantStrategy {
    /// Creates a new schema-per-tenant strategy with the given configuration.
    ///
    /// # Errors
    ///
    /// Fails if the prefix or shared schema is not a plain lowercase
    /// identifier, or if the shared schema could be mistaken for a tenant
    /// schema.
    pub fn new(config: SchemaPerTenantConfig) -> Result<Self, ValidationError> {
        if !is_plain_identifier(&config.schema_prefix) {
            return Err(ValidationError::InvalidConfiguration {
                message: format!(
                    "schema prefix '{}' must match [a-z][a-z0-9_]*",
                    config.schema_prefix
                ),
            });
        }
        if !is_plain_identifier(&config.shared_schema) {
            return Err(ValidationError::InvalidConfiguration {
                message: format!(
                    "shared schema '{}' must match [a-z][a-z0-9_]*",
                    config.shared_schema
                ),
            });
        }
        if config.shared_schema.starts_with(&config.schema_prefix) {
            return Err(ValidationError::InvalidConfiguration {
                message: format!(
                    "shared schema '{}' must not start with the tenant prefix '{}'",
                    config.shared_schema, config.schema_prefix
                ),
            });
        }
        if config.max_schema_length == 0 || config.max_schema_length > 63 {
            return Err(ValidationError::InvalidConfiguration {
                message: "max_schema_length must be between 1 and 63".to_string(),
            });
        }
        if config.shared_schema.len() > config.max_schema_length {
            return Err(ValidationError::InvalidConfiguration {
                message: format!(
                    "shared schema '{}' exceeds {} characters",
                    config.shared_schema, config.max_schema_length
                ),
            });
        }

        Ok(Self { config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SchemaPerTenantConfig {
        &self.config
    }

    /// Returns the tenant schema prefix.
    pub fn schema_prefix(&self) -> &str {
        &self.config.schema_prefix
    }

    /// Returns the shared schema name.
    pub fn shared_schema(&self) -> SchemaName {
        SchemaName(self.config.shared_schema.clone())
    }

    /// Derives the schema name for a tenant.
    ///
    /// Pure and total. The system tenant maps to the shared schema.
    ///
    /// ```
    /// use ehr_persistence::strategy::{SchemaPerTenantConfig, SchemaPerTenantStrategy};
    /// use ehr_persistence::tenant::TenantId;
    ///
    /// let strategy = SchemaPerTenantStrategy::new(SchemaPerTenantConfig::default()).unwrap();
    /// let schema = strategy.schema_for(&TenantId::parse("st-marys").unwrap());
    /// assert_eq!(schema.as_str(), "tenant_st_marys");
    /// ```
    pub fn schema_for(&self, tenant_id: &TenantId) -> SchemaName {
        if tenant_id.is_system() {
            return self.shared_schema();
        }
        SchemaName(format!(
            "{}{}",
            self.config.schema_prefix,
            tenant_id.as_str().replace('-', "_")
        ))
    }

    /// Recovers the tenant that owns a schema, if the schema is a tenant schema.
    pub fn tenant_for_schema(&self, schema: &str) -> Option<TenantId> {
        let suffix = schema.strip_prefix(&self.config.schema_prefix)?;
        let tenant = TenantId::parse(&suffix.replace('_', "-")).ok()?;
        (self.schema_for(&tenant).as_str() == schema).then_some(tenant)
    }

    /// Checks that the tenant's schema name fits the identifier limit.
    pub fn validate(&self, tenant_id: &TenantId) -> Result<SchemaName, ValidationError> {
        let schema = self.schema_for(tenant_id);
        if schema.as_str().len() > self.config.max_schema_length {
            return Err(ValidationError::InvalidSchemaName {
                schema: schema.0,
                reason: format!(
                    "schema name exceeds maximum length of {} characters",
                    self.config.max_schema_length
                ),
            });
        }
        Ok(schema)
    }

    /// Generates SQL to set the search_path for a tenant schema.
    pub fn set_search_path_sql(&self, schema: &SchemaName) -> String {
        if schema.as_str() == self.config.shared_schema {
            return self.set_shared_search_path_sql();
        }
        format!(
            "SET search_path TO {}, {}, public",
            schema.quoted(),
            quote_identifier(&self.config.shared_schema)
        )
    }

    /// Generates SQL to set the search_path to the shared schema only.
    pub fn set_shared_search_path_sql(&self) -> String {
        format!(
            "SET search_path TO {}, public",
            quote_identifier(&self.config.shared_schema)
        )
    }

    /// Generates SQL that returns a session to its connection-time state.
    ///
    /// `RESET ALL` restores `search_path` and every other setting to the
    /// value the connection started with. `DISCARD TEMP` drops temporary
    /// tables, which resolve ahead of every schema on the path. Prepared
    /// statements are kept.
    pub fn reset_session_sql(&self) -> &'static str {
        RESET_SESSION_SQL
    }

    /// Generates SQL to create a schema.
    pub fn create_schema_sql(&self, schema: &SchemaName) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", schema.quoted())
    }

    /// Generates SQL to drop a schema and everything in it.
    pub fn drop_schema_sql(&self, schema: &SchemaName) -> String {
        format!("DROP SCHEMA IF EXISTS {} CASCADE", schema.quoted())
    }
}

const RESET_SESSION_SQL: &str = "\
    CLOSE ALL; \
    SET SESSION AUTHORIZATION DEFAULT; \
    RESET ALL; \
    UNLISTEN *; \
    SELECT pg_advisory_unlock_all(); \
    DISCARD TEMP; \
    DISCARD SEQUENCES;";

/// Escapes a SQL identifier (schema name, table name, etc.).
pub(crate) fn quote_identifier(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\"\""))
}

fn is_plain_identifier(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_lowercase())
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
