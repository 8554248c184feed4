//! Tenant-bound statement execution.
//!
//! [`TenantExecutor`] is the only surface through which repositories talk to
//! the database. Implementations exist solely for connections and
//! transactions that a tenant scope has already bound to a tenant schema, so
//! holding a `&dyn TenantExecutor` is proof that a bound scope exists.

use async_trait::async_trait;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

use crate::error::StorageResult;
use crate::strategy::SchemaName;
use crate::tenant::TenantId;

/// Statement parameters as accepted by [`TenantExecutor`] methods.
pub type SqlParams<'a> = &'a [&'a (dyn ToSql + Sync)];

/// Executes statements against exactly one tenant schema.
///
/// All driver errors are mapped to [`StorageError`](crate::error::StorageError),
/// so constraint violations arrive as typed
/// [`ConstraintError`](crate::error::ConstraintError) values.
///
/// Statements that would end the scope's binding (transaction control,
/// `search_path` changes, `DISCARD`, role switches) are rejected with
/// [`ValidationError::ForbiddenStatement`](crate::error::ValidationError::ForbiddenStatement).
#[async_trait]
pub trait TenantExecutor: Send + Sync {
    /// The tenant this executor is bound to.
    fn tenant_id(&self) -> &TenantId;

    /// The schema this executor is bound to.
    fn schema(&self) -> &SchemaName;

    /// Runs a statement and returns all rows.
    async fn query(&self, sql: &str, params: SqlParams<'_>) -> StorageResult<Vec<Row>>;

    /// Runs a statement expected to return at most one row.
    async fn query_opt(&self, sql: &str, params: SqlParams<'_>) -> StorageResult<Option<Row>>;

    /// Runs a statement expected to return exactly one row.
    async fn query_one(&self, sql: &str, params: SqlParams<'_>) -> StorageResult<Row>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&self, sql: &str, params: SqlParams<'_>) -> StorageResult<u64>;
}
