//! Tenant-bound connections.
//!
//! A pooled connection moves through two types. [`UnboundConnection`] has no
//! statement API; the only thing it can do is bind itself to a tenant schema.
//! A successful bind yields a [`TenantConnection`], which implements
//! [`TenantExecutor`] and is handed to the unit of work.
//!
//! Neither type ever lets a connection go back to the pool while it may
//! still carry a tenant binding or other tenant session state. The orderly
//! path resets the whole session first; every other path (panic, dropped
//! future, failed reset, interrupted statement) detaches the connection from
//! the pool and closes it.

use std::future::pending;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::Object;
use tokio::time::{Instant, sleep_until};
use tokio_postgres::{NoTls, Row};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::guard::check_statement;
use super::transaction::TenantTransaction;
use crate::core::{SqlParams, TenantExecutor, TransactionOptions};
use crate::error::{
    BackendError, ScopeError, ScopePhase, StorageError, StorageResult, TenantError,
};
use crate::strategy::{SchemaName, SchemaPerTenantStrategy};
use crate::tenant::TenantId;

const SCHEMA_EXISTS_SQL: &str =
    "SELECT EXISTS(SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)";

/// Per-call options for a tenant scope.
///
/// Both the deadline and the cancellation token cover the whole scope:
/// waiting for a connection, binding it, and running the unit of work.
///
/// ```
/// use std::time::Duration;
/// use ehr_persistence::backends::postgres::ScopeOptions;
/// use tokio_util::sync::CancellationToken;
///
/// let token = CancellationToken::new();
/// let options = ScopeOptions::new()
///     .with_timeout(Duration::from_secs(2))
///     .with_cancellation(token.clone());
/// assert_eq!(options.timeout, Some(Duration::from_secs(2)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScopeOptions {
    /// Deadline for the whole scope, measured from entry.
    pub timeout: Option<Duration>,
    /// Caller-controlled cancellation.
    pub cancel: Option<CancellationToken>,
}

impl ScopeOptions {
    /// Creates options with no deadline and no cancellation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scope deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Why a scope stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

/// The interruption source of one scope.
pub(crate) struct ScopeSignal {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl ScopeSignal {
    /// Starts the deadline clock.
    pub(crate) fn start(options: &ScopeOptions) -> Self {
        Self {
            cancel: options.cancel.clone(),
            deadline: options.timeout.map(|timeout| Instant::now() + timeout),
            timeout: options.timeout,
        }
    }

    /// Resolves when the scope is cancelled or its deadline passes.
    ///
    /// Never resolves when neither is configured. Cancellation wins when
    /// both are already due.
    pub(crate) async fn wait(&self) -> Interrupt {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Interrupt::Cancelled,
            _ = expired => Interrupt::DeadlineExceeded,
        }
    }

    /// Builds the error reported for an interruption.
    pub(crate) fn error(
        &self,
        interrupt: Interrupt,
        tenant_id: &TenantId,
        phase: ScopePhase,
    ) -> StorageError {
        let err = match interrupt {
            Interrupt::Cancelled => ScopeError::Cancelled {
                tenant_id: tenant_id.clone(),
                phase,
            },
            Interrupt::DeadlineExceeded => ScopeError::DeadlineExceeded {
                tenant_id: tenant_id.clone(),
                phase,
                timeout_ms: self
                    .timeout
                    .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
                    .unwrap_or(0),
            },
        };
        err.into()
    }
}

/// Detaches a connection from the pool and closes it.
pub(crate) fn discard(object: Object, reason: &str) {
    warn!(reason, "discarding pooled connection");
    drop(Object::take(object));
}

fn released() -> StorageError {
    StorageError::Backend(BackendError::ConnectionLost {
        message: "connection already released".to_string(),
    })
}

/// A pooled connection that is not bound to any tenant.
///
/// Exposes no statements. Dropping it returns the connection to the pool
/// unless binding already started changing session state, in which case the
/// connection is discarded.
pub(crate) struct UnboundConnection {
    object: Option<Object>,
    dirty: bool,
}

impl UnboundConnection {
    pub(crate) fn new(object: Object) -> Self {
        Self {
            object: Some(object),
            dirty: false,
        }
    }

    /// Binds the connection to the tenant's schema.
    ///
    /// A missing schema yields [`TenantError::NotProvisioned`] and leaves the
    /// connection untouched.
    pub(crate) async fn bind(
        mut self,
        strategy: &SchemaPerTenantStrategy,
        tenant_id: TenantId,
        schema: SchemaName,
    ) -> StorageResult<TenantConnection> {
        let object = self.object.as_ref().ok_or_else(released)?;

        let row = object.query_one(SCHEMA_EXISTS_SQL, &[&schema.as_str()]).await?;
        let exists: bool = row.get(0);
        if !exists {
            return Err(TenantError::NotProvisioned {
                tenant_id,
                schema: schema.to_string(),
            }
            .into());
        }

        self.dirty = true;
        object
            .batch_execute(&strategy.set_search_path_sql(&schema))
            .await?;

        let object = self.object.take().ok_or_else(released)?;
        Ok(TenantConnection {
            object: Some(object),
            tenant_id,
            schema,
            reset_sql: strategy.reset_session_sql(),
        })
    }
}

impl Drop for UnboundConnection {
    fn drop(&mut self) {
        if self.dirty {
            if let Some(object) = self.object.take() {
                discard(object, "binding interrupted");
            }
        }
    }
}

/// A pooled connection bound to exactly one tenant schema.
///
/// Handed to the unit of work by
/// [`TenantPool::with_tenant`](super::TenantPool::with_tenant). Every
/// statement it runs resolves unqualified table names in the tenant schema
/// first, then the shared schema, then `public`.
pub struct TenantConnection {
    object: Option<Object>,
    tenant_id: TenantId,
    schema: SchemaName,
    reset_sql: &'static str,
}

impl std::fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnection")
            .field("tenant_id", &self.tenant_id)
            .field("schema", &self.schema)
            .field("bound", &self.object.is_some())
            .finish()
    }
}

impl TenantConnection {
    fn client(&self) -> StorageResult<&Object> {
        self.object.as_ref().ok_or_else(released)
    }

    /// Opens a transaction on this connection.
    ///
    /// The transaction rolls back unless [`TenantTransaction::commit`] is
    /// called. While it is open the connection cannot be used directly.
    pub async fn transaction(
        &mut self,
        options: TransactionOptions,
    ) -> StorageResult<TenantTransaction<'_>> {
        let object = self.object.as_mut().ok_or_else(released)?;
        let txn = object
            .build_transaction()
            .isolation_level(super::transaction::pg_isolation_level(
                options.isolation_level,
            ))
            .read_only(options.read_only)
            .start()
            .await?;

        Ok(TenantTransaction::new(txn, &self.tenant_id, &self.schema))
    }

    /// Resets the session and returns the connection to the pool.
    ///
    /// The reset runs directly on the client, not through the statement
    /// guard. A closed connection, or one whose reset fails, is discarded
    /// instead.
    pub(crate) async fn release(mut self) {
        let reset = match self.object.as_ref() {
            None => return,
            Some(object) if object.is_closed() => Err("connection closed".to_string()),
            Some(object) => object
                .batch_execute(self.reset_sql)
                .await
                .map_err(|e| format!("failed to reset session: {}", e)),
        };

        match reset {
            Ok(()) => {
                drop(self.object.take());
                debug!("connection reset and returned to pool");
            }
            Err(reason) => {
                if let Some(object) = self.object.take() {
                    discard(object, &reason);
                }
            }
        }
    }

    /// Cancels any in-flight statement and discards the connection.
    pub(crate) async fn abandon(mut self, reason: &str) {
        if let Some(object) = self.object.take() {
            if let Err(e) = object.cancel_token().cancel_query(NoTls).await {
                warn!(error = %e, "failed to cancel in-flight statement");
            }
            discard(object, reason);
        }
    }
}

impl Drop for TenantConnection {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            discard(object, "tenant connection dropped while bound");
        }
    }
}

#[async_trait]
impl TenantExecutor for TenantConnection {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    fn schema(&self) -> &SchemaName {
        &self.schema
    }

    async fn query(&self, sql: &str, params: SqlParams<'_>) -> StorageResult<Vec<Row>> {
        check_statement(sql)?;
        Ok(self.client()?.query(sql, params).await?)
    }

    async fn query_opt(&self, sql: &str, params: SqlParams<'_>) -> StorageResult<Option<Row>> {
        check_statement(sql)?;
        Ok(self.client()?.query_opt(sql, params).await?)
    }

    async fn query_one(&self, sql: &str, params: SqlParams<'_>) -> StorageResult<Row> {
        check_statement(sql)?;
        Ok(self.client()?.query_one(sql, params).await?)
    }

    async fn execute(&self, sql: &str, params: SqlParams<'_>) -> StorageResult<u64> {
        check_statement(sql)?;
        Ok(self.client()?.execute(sql, params).await?)
    }
}
