//! The tenant pool and the tenant scope.

use std::fmt::Debug;
use std::sync::Arc;

use deadpool_postgres::{Object, Pool, PoolError};
use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span};

use super::config::PostgresConfig;
use super::scope::{ScopeOptions, ScopeSignal, TenantConnection, UnboundConnection};
use crate::error::{BackendError, ScopePhase, StorageError, StorageResult};
use crate::strategy::{SchemaName, SchemaPerTenantStrategy};
use crate::tenant::{TenantContext, TenantId};

/// A snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Maximum number of connections.
    pub max_size: usize,
    /// Connections currently open.
    pub size: usize,
    /// Idle connections ready to be handed out.
    pub available: usize,
    /// Callers waiting for a connection.
    pub waiting: usize,
}

/// Connection pool shared by every tenant.
///
/// The pool is an explicitly owned handle: create it once at process start,
/// clone it into whatever needs it, and [`close`](Self::close) it at
/// shutdown. Clones share the same underlying connections.
///
/// Tenant data is reachable only through [`with_tenant`](Self::with_tenant)
/// and its variants.
#[derive(Clone)]
pub struct TenantPool {
    pool: Pool,
    strategy: Arc<SchemaPerTenantStrategy>,
}

impl Debug for TenantPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantPool")
            .field("strategy", &self.strategy)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl TenantPool {
    /// Builds a pool from configuration and verifies connectivity.
    pub async fn new(config: PostgresConfig) -> StorageResult<Self> {
        let strategy = SchemaPerTenantStrategy::new(config.tenancy.clone())?;
        let pool = config.create_pool()?;
        let tenant_pool = Self::from_pool(pool, strategy);

        tenant_pool.health_check().await?;
        info!(
            host = %config.host,
            dbname = %config.dbname,
            max_connections = config.max_connections,
            "PostgreSQL tenant pool ready"
        );

        Ok(tenant_pool)
    }

    /// Builds a pool from the `EHR_PG_*` environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Wraps an existing deadpool pool.
    ///
    /// The pool must not be used for anything else: connections it hands out
    /// elsewhere could come back with session state this type does not know
    /// about.
    pub fn from_pool(pool: Pool, strategy: SchemaPerTenantStrategy) -> Self {
        Self {
            pool,
            strategy: Arc::new(strategy),
        }
    }

    /// Returns the naming strategy.
    pub fn strategy(&self) -> &SchemaPerTenantStrategy {
        &self.strategy
    }

    /// Derives the schema name for a tenant.
    pub fn schema_for(&self, tenant_id: &TenantId) -> SchemaName {
        self.strategy.schema_for(tenant_id)
    }

    /// Returns current pool occupancy.
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    /// Closes the pool. Pending and future acquisitions fail with
    /// [`BackendError::PoolClosed`].
    pub fn close(&self) {
        self.pool.close();
        info!("PostgreSQL tenant pool closed");
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Checks that a connection can be acquired and used.
    pub async fn health_check(&self) -> StorageResult<()> {
        let client = self.get_object().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    /// Returns the `search_path` of an idle pooled connection.
    ///
    /// Diagnostic only: it never binds the connection, so a correct pool
    /// always reports the server default here.
    pub async fn session_search_path(&self) -> StorageResult<String> {
        let client = self.get_object().await?;
        let row = client.query_one("SHOW search_path", &[]).await?;
        Ok(row.get(0))
    }

    /// Returns whether an idle pooled connection resolves `table` without a
    /// schema qualifier.
    ///
    /// Diagnostic only. Temporary tables count, since they resolve ahead of
    /// the `search_path`. A correct pool never resolves tenant tables here.
    pub async fn session_resolves_table(&self, table: &str) -> StorageResult<bool> {
        let client = self.get_object().await?;
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM pg_catalog.pg_class
                               WHERE relname = $1 AND pg_catalog.pg_table_is_visible(oid))",
                &[&table],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Gets a raw connection from the pool.
    pub(crate) async fn get_object(&self) -> StorageResult<Object> {
        let started = Instant::now();
        self.pool
            .get()
            .await
            .map_err(|e| map_pool_error(e, started))
    }

    /// Runs a unit of work bound to the tenant's schema.
    ///
    /// The scope acquires one pooled connection, points its `search_path` at
    /// the tenant schema (then the shared schema, then `public`), runs
    /// `work`, resets the connection and returns it to the pool. The reset
    /// happens whatever `work` returns; a connection that cannot be reset is
    /// discarded instead of being returned.
    ///
    /// Errors raised by `work` come back exactly as produced. Errors raised
    /// by the scope itself are converted with `E::from(StorageError)`:
    ///
    /// - invalid schema name: [`ErrorKind::Validation`](crate::error::ErrorKind::Validation)
    /// - pool exhausted or closed: [`ErrorKind::Unavailable`](crate::error::ErrorKind::Unavailable)
    /// - schema missing: [`ErrorKind::NotProvisioned`](crate::error::ErrorKind::NotProvisioned)
    ///
    /// Nothing is retried.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use ehr_persistence::backends::postgres::{PostgresConfig, TenantPool};
    /// use ehr_persistence::core::TenantExecutor;
    /// use ehr_persistence::error::StorageError;
    /// use ehr_persistence::tenant::TenantContext;
    ///
    /// # async fn example() -> Result<(), StorageError> {
    /// let pool = TenantPool::new(PostgresConfig::default()).await?;
    /// let ctx = TenantContext::parse("st-marys")?;
    ///
    /// let patients: i64 = pool
    ///     .with_tenant(&ctx, |conn| {
    ///         Box::pin(async move {
    ///             let row = conn.query_one("SELECT count(*) FROM patients", &[]).await?;
    ///             Ok::<_, StorageError>(row.get(0))
    ///         })
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_tenant<T, E, F>(&self, ctx: &TenantContext, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut TenantConnection) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<StorageError> + Send,
    {
        self.with_tenant_options(ctx, ScopeOptions::default(), work)
            .await
    }

    /// Runs a unit of work bound to the tenant's schema, honoring a deadline
    /// and a cancellation token.
    ///
    /// An interruption while waiting for a connection abandons the wait. An
    /// interruption while the unit of work runs cancels the in-flight
    /// statement on the server and discards the connection. Either way the
    /// scope returns [`ScopeError`](crate::error::ScopeError) only after the
    /// connection is no longer bound.
    pub async fn with_tenant_options<T, E, F>(
        &self,
        ctx: &TenantContext,
        options: ScopeOptions,
        work: F,
    ) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut TenantConnection) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<StorageError> + Send,
    {
        let tenant_id = ctx.tenant_id().clone();
        let schema = self
            .strategy
            .validate(&tenant_id)
            .map_err(|e| E::from(StorageError::from(e)))?;

        let span = info_span!(
            "tenant_scope",
            tenant = %tenant_id,
            schema = %schema,
            correlation_id = ?ctx.correlation_id(),
        );

        self.run_scope(tenant_id, schema, options, work)
            .instrument(span)
            .await
    }

    /// Runs a unit of work bound to the shared reference-data schema.
    pub async fn with_shared<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut TenantConnection) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<StorageError> + Send,
    {
        self.with_tenant(&TenantContext::system(), work).await
    }

    async fn run_scope<T, E, F>(
        &self,
        tenant_id: TenantId,
        schema: SchemaName,
        options: ScopeOptions,
        work: F,
    ) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut TenantConnection) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<StorageError> + Send,
    {
        let signal = ScopeSignal::start(&options);

        debug!("acquiring connection");
        let object = tokio::select! {
            biased;
            interrupt = signal.wait() => {
                return Err(E::from(signal.error(interrupt, &tenant_id, ScopePhase::Acquiring)));
            }
            result = self.get_object() => result.map_err(E::from)?,
        };

        debug!("binding connection");
        let unbound = UnboundConnection::new(object);
        let mut conn = tokio::select! {
            biased;
            interrupt = signal.wait() => {
                return Err(E::from(signal.error(interrupt, &tenant_id, ScopePhase::Binding)));
            }
            result = unbound.bind(&self.strategy, tenant_id.clone(), schema) => {
                result.map_err(E::from)?
            }
        };

        debug!("executing unit of work");
        let outcome = {
            let fut = work(&mut conn);
            tokio::select! {
                biased;
                interrupt = signal.wait() => Err(interrupt),
                result = fut => Ok(result),
            }
        };

        match outcome {
            Ok(result) => {
                conn.release().await;
                if result.is_err() {
                    debug!("unit of work failed");
                }
                result
            }
            Err(interrupt) => {
                conn.abandon("unit of work interrupted").await;
                Err(E::from(signal.error(
                    interrupt,
                    &tenant_id,
                    ScopePhase::Executing,
                )))
            }
        }
    }
}

fn map_pool_error(err: PoolError, started: Instant) -> StorageError {
    match err {
        PoolError::Timeout(_) => StorageError::Backend(BackendError::PoolExhausted {
            waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }),
        other => other.into(),
    }
}
