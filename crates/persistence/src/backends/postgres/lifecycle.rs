//! Tenant onboarding and offboarding for PostgreSQL.
//!
//! Provisioning and deprovisioning each run in a single transaction that
//! holds a transaction-scoped advisory lock keyed by the schema name, so
//! concurrent calls for the same tenant serialize instead of racing on DDL.

use async_trait::async_trait;
use deadpool_postgres::Transaction;
use tracing::info;

use super::TenantPool;
use super::schema::{self, SCHEMA_VERSION};
use crate::core::{ProvisionOutcome, SchemaLifecycle};
use crate::error::{StorageResult, TenantError, ValidationError};
use crate::strategy::{SchemaName, quote_identifier};
use crate::tenant::TenantId;

const LOCK_SQL: &str = "SELECT pg_advisory_xact_lock(hashtext('ehr-schema:' || $1::text))";

const SCHEMA_EXISTS_SQL: &str =
    "SELECT EXISTS(SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)";

async fn lock_schema(txn: &Transaction<'_>, schema: &SchemaName) -> StorageResult<()> {
    txn.execute(LOCK_SQL, &[&schema.as_str()]).await?;
    Ok(())
}

async fn schema_exists(txn: &Transaction<'_>, schema: &SchemaName) -> StorageResult<bool> {
    let row = txn.query_one(SCHEMA_EXISTS_SQL, &[&schema.as_str()]).await?;
    Ok(row.get(0))
}

fn reject_system(tenant_id: &TenantId) -> StorageResult<()> {
    if tenant_id.is_system() {
        return Err(ValidationError::InvalidTenantId {
            input: tenant_id.to_string(),
            reason: "the shared schema is managed by init_shared_schema".to_string(),
        }
        .into());
    }
    Ok(())
}

#[async_trait]
impl SchemaLifecycle for TenantPool {
    async fn init_shared_schema(&self) -> StorageResult<()> {
        let shared = self.strategy().shared_schema();
        let mut client = self.get_object().await?;
        let txn = client.transaction().await?;

        lock_schema(&txn, &shared).await?;
        txn.batch_execute(&self.strategy().create_schema_sql(&shared))
            .await?;
        txn.batch_execute(&format!("SET LOCAL search_path TO {}", shared.quoted()))
            .await?;
        schema::create_shared_tables(&txn).await?;
        txn.commit().await?;

        info!(schema = %shared, "shared schema ready");
        Ok(())
    }

    async fn provision_tenant(&self, tenant_id: &TenantId) -> StorageResult<ProvisionOutcome> {
        reject_system(tenant_id)?;
        let schema = self.strategy().validate(tenant_id)?;

        let mut client = self.get_object().await?;
        let txn = client.transaction().await?;

        lock_schema(&txn, &schema).await?;
        let existed = schema_exists(&txn, &schema).await?;

        txn.batch_execute(&self.strategy().create_schema_sql(&schema))
            .await?;
        // Reverts at commit; the pooled connection keeps its default path.
        txn.batch_execute(&format!("SET LOCAL search_path TO {}", schema.quoted()))
            .await?;
        let previous = schema::migrate_tenant_schema(&txn).await?;
        txn.commit().await?;

        let outcome = match (existed, previous) {
            (false, _) => ProvisionOutcome::Created,
            (true, v) if v == SCHEMA_VERSION => ProvisionOutcome::AlreadyProvisioned,
            (true, v) => ProvisionOutcome::Migrated {
                from: v,
                to: SCHEMA_VERSION,
            },
        };

        info!(tenant = %tenant_id, schema = %schema, outcome = %outcome, "tenant provisioned");
        Ok(outcome)
    }

    async fn deprovision_tenant(&self, tenant_id: &TenantId) -> StorageResult<()> {
        reject_system(tenant_id)?;
        let schema = self.strategy().validate(tenant_id)?;

        let mut client = self.get_object().await?;
        let txn = client.transaction().await?;

        lock_schema(&txn, &schema).await?;
        if !schema_exists(&txn, &schema).await? {
            return Err(TenantError::NotProvisioned {
                tenant_id: tenant_id.clone(),
                schema: schema.to_string(),
            }
            .into());
        }

        txn.batch_execute(&self.strategy().drop_schema_sql(&schema))
            .await?;
        txn.commit().await?;

        info!(tenant = %tenant_id, schema = %schema, "tenant deprovisioned");
        Ok(())
    }

    async fn is_provisioned(&self, tenant_id: &TenantId) -> StorageResult<bool> {
        let schema = self.strategy().validate(tenant_id)?;
        let client = self.get_object().await?;
        let row = client
            .query_one(SCHEMA_EXISTS_SQL, &[&schema.as_str()])
            .await?;
        Ok(row.get(0))
    }

    async fn schema_version(&self, tenant_id: &TenantId) -> StorageResult<Option<i32>> {
        let schema = self.strategy().validate(tenant_id)?;
        let client = self.get_object().await?;

        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1),
                        EXISTS(SELECT 1 FROM pg_catalog.pg_tables
                               WHERE schemaname = $1 AND tablename = 'schema_version')",
                &[&schema.as_str()],
            )
            .await?;
        let (exists, has_table): (bool, bool) = (row.get(0), row.get(1));

        if !exists {
            return Ok(None);
        }
        if !has_table {
            return Ok(Some(0));
        }

        let row = client
            .query_one(
                &format!(
                    "SELECT max(version) FROM {}.{}",
                    schema.quoted(),
                    quote_identifier("schema_version")
                ),
                &[],
            )
            .await?;
        Ok(Some(row.get::<_, Option<i32>>(0).unwrap_or(0)))
    }

    async fn list_tenants(&self) -> StorageResult<Vec<TenantId>> {
        let prefix = self.strategy().schema_prefix().to_string();
        let client = self.get_object().await?;

        // Prefix match without LIKE, whose `_` wildcard would also match
        // schemas that merely resemble the prefix.
        let rows = client
            .query(
                "SELECT nspname::text FROM pg_catalog.pg_namespace
                 WHERE left(nspname::text, length($1::text)) = $1::text
                 ORDER BY nspname",
                &[&prefix],
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| self.strategy().tenant_for_schema(row.get(0)))
            .collect())
    }
}
