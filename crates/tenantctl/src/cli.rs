//! Command line arguments.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `EHR_DATABASE_URL` | postgres://ehr@localhost:5432/ehr | PostgreSQL connection URL |
//! | `EHR_SCHEMA_PREFIX` | tenant_ | Prefix of tenant schema names |
//! | `EHR_SHARED_SCHEMA` | shared | Shared reference-data schema |
//! | `EHR_PG_MAX_CONNECTIONS` | 2 | Pool size |
//! | `EHR_LOG_LEVEL` | info | Log level |

use clap::{Parser, Subcommand};
use ehr_persistence::backends::postgres::PostgresConfig;
use ehr_persistence::error::StorageResult;
use ehr_persistence::strategy::SchemaPerTenantConfig;
use ehr_persistence::tenant::TenantId;

/// Tenant administration for the EHR database.
#[derive(Debug, Clone, Parser)]
#[command(name = "tenantctl", version)]
#[command(about = "Tenant onboarding and offboarding for the EHR database")]
pub struct Cli {
    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "EHR_DATABASE_URL",
        default_value = "postgres://ehr@localhost:5432/ehr",
        hide_env_values = true
    )]
    pub database_url: String,

    /// Prefix of tenant schema names.
    #[arg(long, env = "EHR_SCHEMA_PREFIX", default_value = "tenant_")]
    pub schema_prefix: String,

    /// Schema holding shared reference data.
    #[arg(long, env = "EHR_SHARED_SCHEMA", default_value = "shared")]
    pub shared_schema: String,

    /// Maximum number of pooled connections.
    #[arg(long, env = "EHR_PG_MAX_CONNECTIONS", default_value = "2")]
    pub max_connections: usize,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "EHR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Administrative operations.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create the shared reference-data schema.
    InitShared,

    /// Create a tenant's schema and tables, or upgrade them.
    Provision {
        /// Tenant identifier.
        tenant: TenantId,
    },

    /// Drop a tenant's schema and all of its data.
    Deprovision {
        /// Tenant identifier.
        tenant: TenantId,

        /// Confirm the irreversible drop.
        #[arg(long)]
        yes: bool,
    },

    /// List provisioned tenants.
    List,

    /// Show a tenant's schema and version.
    Status {
        /// Tenant identifier.
        tenant: TenantId,
    },

    /// Check database connectivity.
    Health,
}

impl Cli {
    /// Builds the pool configuration from the arguments.
    pub fn postgres_config(&self) -> StorageResult<PostgresConfig> {
        let tenancy = SchemaPerTenantConfig::default()
            .with_prefix(self.schema_prefix.clone())
            .with_shared_schema(self.shared_schema.clone());

        Ok(PostgresConfig::from_connection_string(&self.database_url)?
            .with_max_connections(self.max_connections)
            .with_tenancy(tenancy))
    }
}
