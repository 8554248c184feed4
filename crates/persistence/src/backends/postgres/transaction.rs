//! Transactions on a tenant-bound connection.

use async_trait::async_trait;
use deadpool_postgres::Transaction;
use tokio_postgres::Row;

use super::guard::check_statement;
use crate::core::{IsolationLevel, SqlParams, TenantExecutor};
use crate::error::StorageResult;
use crate::strategy::SchemaName;
use crate::tenant::TenantId;

pub(crate) fn pg_isolation_level(level: IsolationLevel) -> tokio_postgres::IsolationLevel {
    match level {
        IsolationLevel::ReadCommitted => tokio_postgres::IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead => tokio_postgres::IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable => tokio_postgres::IsolationLevel::Serializable,
    }
}

/// A transaction on a [`TenantConnection`](super::TenantConnection).
///
/// Borrows the connection for its whole lifetime, so it cannot outlive the
/// tenant scope. The transaction is automatically rolled back on drop if not
/// committed.
pub struct TenantTransaction<'c> {
    txn: Transaction<'c>,
    tenant_id: &'c TenantId,
    schema: &'c SchemaName,
}

impl std::fmt::Debug for TenantTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantTransaction")
            .field("tenant_id", self.tenant_id)
            .field("schema", self.schema)
            .finish()
    }
}

impl<'c> TenantTransaction<'c> {
    pub(crate) fn new(txn: Transaction<'c>, tenant_id: &'c TenantId, schema: &'c SchemaName) -> Self {
        Self {
            txn,
            tenant_id,
            schema,
        }
    }

    /// Commits the transaction.
    pub async fn commit(self) -> StorageResult<()> {
        self.txn.commit().await?;
        Ok(())
    }

    /// Rolls the transaction back.
    pub async fn rollback(self) -> StorageResult<()> {
        self.txn.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl<'c> TenantExecutor for TenantTransaction<'c> {
    fn tenant_id(&self) -> &TenantId {
        self.tenant_id
    }

    fn schema(&self) -> &SchemaName {
        self.schema
    }

    async fn query(&self, sql: &str, params: SqlParams<'_>) -> StorageResult<Vec<Row>> {
        check_statement(sql)?;
        Ok(self.txn.query(sql, params).await?)
    }

    async fn query_opt(&self, sql: &str, params: SqlParams<'_>) -> StorageResult<Option<Row>> {
        check_statement(sql)?;
        Ok(self.txn.query_opt(sql, params).await?)
    }

    async fn query_one(&self, sql: &str, params: SqlParams<'_>) -> StorageResult<Row> {
        check_statement(sql)?;
        Ok(self.txn.query_one(sql, params).await?)
    }

    async fn execute(&self, sql: &str, params: SqlParams<'_>) -> StorageResult<u64> {
        check_statement(sql)?;
        Ok(self.txn.execute(sql, params).await?)
    }
}
