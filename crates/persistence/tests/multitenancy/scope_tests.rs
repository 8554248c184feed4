//! Tests for the tenant scope's acquire/bind/release guarantees.
//!
//! Most tests use a single-connection pool, so the connection probed after
//! a scope is the same one the scope just used.

use std::time::{Duration, Instant};

use ehr_persistence::backends::postgres::ScopeOptions;
use ehr_persistence::error::{ErrorKind, ScopeError, ScopePhase, StorageError, TenantError};
use ehr_persistence::repository::{PatientFilter, PatientRepository};
use ehr_persistence::{TenantExecutor, TransactionOptions};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::common::{
    assert_pool_unbound, create_pool_with, create_single_connection_pool, patient, pg_config,
    provisioned_tenant, unique_tenant,
};

async fn count_patients(
    pool: &ehr_persistence::TenantPool,
    ctx: &ehr_persistence::TenantContext,
) -> i64 {
    pool.with_tenant(ctx, |conn| {
        Box::pin(async move { PatientRepository::count(&*conn, &PatientFilter::default()).await })
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_connection_unbound_after_success() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;

    let search_path = pool
        .with_tenant(&ctx, |conn| {
            Box::pin(async move {
                PatientRepository::create(&*conn, &patient("OK-1")).await?;
                let row = conn.query_one("SHOW search_path", &[]).await?;
                Ok::<String, StorageError>(row.get(0))
            })
        })
        .await
        .unwrap();

    let schema = pool.schema_for(ctx.tenant_id());
    assert!(search_path.starts_with(&schema.quoted()) || search_path.starts_with(schema.as_str()));
    assert_pool_unbound(&pool).await;
}

#[tokio::test]
async fn test_connection_unbound_after_error() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;

    let err = pool
        .with_tenant(&ctx, |conn| {
            Box::pin(async move {
                PatientRepository::create(&*conn, &patient("DUP")).await?;
                PatientRepository::create(&*conn, &patient("DUP")).await
            })
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

    assert_pool_unbound(&pool).await;
    assert_eq!(count_patients(&pool, &ctx).await, 1);
}

#[tokio::test]
async fn test_connection_unbound_after_sql_error() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;

    let result = pool
        .with_tenant(&ctx, |conn| {
            Box::pin(async move { conn.execute("SELECT * FROM no_such_table", &[]).await })
        })
        .await;
    assert!(result.is_err());

    assert_pool_unbound(&pool).await;
}

#[tokio::test]
async fn test_connection_unbound_after_panic() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;

    let task_pool = pool.clone();
    let task_ctx = ctx.clone();
    let joined = tokio::spawn(async move {
        task_pool
            .with_tenant(&task_ctx, |conn| {
                Box::pin(async move {
                    PatientRepository::create(&*conn, &patient("PANIC")).await?;
                    if conn.tenant_id().as_str().starts_with("scope") {
                        panic!("unit of work panicked");
                    }
                    Ok::<(), StorageError>(())
                })
            })
            .await
    })
    .await;
    assert!(joined.unwrap_err().is_panic());

    assert_pool_unbound(&pool).await;
    assert_eq!(count_patients(&pool, &ctx).await, 1);
}

#[tokio::test]
async fn test_connection_unbound_after_dropped_future() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;

    let scope = pool.with_tenant(&ctx, |conn| {
        Box::pin(async move {
            conn.execute("SELECT pg_sleep(30)", &[]).await?;
            Ok::<_, StorageError>(())
        })
    });
    let timed_out = tokio::time::timeout(Duration::from_millis(300), scope).await;
    assert!(timed_out.is_err());

    assert_pool_unbound(&pool).await;
}

async fn session_settings(
    pool: &ehr_persistence::TenantPool,
    ctx: &ehr_persistence::TenantContext,
) -> (i32, String, String) {
    pool.with_tenant(ctx, |conn| {
        Box::pin(async move {
            let row = conn
                .query_one(
                    "SELECT pg_backend_pid(), current_setting('statement_timeout'),
                            current_setting('work_mem')",
                    &[],
                )
                .await?;
            Ok::<_, StorageError>((row.get(0), row.get(1), row.get(2)))
        })
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_temporary_tables_do_not_outlive_scope() {
    let pool = create_single_connection_pool().await;
    let ctx_a = provisioned_tenant(&pool, "scope").await;
    let ctx_b = provisioned_tenant(&pool, "scope").await;

    pool.with_tenant(&ctx_b, |conn| {
        Box::pin(async move {
            PatientRepository::create(&*conn, &patient("B-1")).await?;
            Ok::<_, StorageError>(())
        })
    })
    .await
    .unwrap();

    // A temporary table resolves ahead of the tenant schema.
    pool.with_tenant(&ctx_a, |conn| {
        Box::pin(async move {
            conn.execute(
                "CREATE TEMP TABLE patients (LIKE patients INCLUDING ALL)",
                &[],
            )
            .await?;
            PatientRepository::create(&*conn, &patient("TEMP-A")).await?;
            Ok::<_, StorageError>(())
        })
    })
    .await
    .unwrap();

    assert_pool_unbound(&pool).await;

    let mrns = pool
        .with_tenant(&ctx_b, |conn| {
            Box::pin(async move {
                let patients = PatientRepository::list(&*conn, &PatientFilter::default()).await?;
                Ok::<_, StorageError>(patients.into_iter().map(|p| p.mrn).collect::<Vec<_>>())
            })
        })
        .await
        .unwrap();
    assert_eq!(mrns, vec!["B-1".to_string()]);
    assert_eq!(count_patients(&pool, &ctx_a).await, 0);
}

#[tokio::test]
async fn test_session_settings_do_not_outlive_scope() {
    let pool = create_single_connection_pool().await;
    let ctx_a = provisioned_tenant(&pool, "scope").await;
    let ctx_b = provisioned_tenant(&pool, "scope").await;

    let (pid, statement_timeout, work_mem) = session_settings(&pool, &ctx_b).await;
    assert_eq!(statement_timeout, "30s");

    pool.with_tenant(&ctx_a, |conn| {
        Box::pin(async move {
            conn.execute("SET statement_timeout = 1234", &[]).await?;
            conn.execute("SET work_mem = '64kB'", &[]).await?;
            Ok::<_, StorageError>(())
        })
    })
    .await
    .unwrap();

    // Same connection, reset rather than replaced.
    let after = session_settings(&pool, &ctx_b).await;
    assert_eq!(after, (pid, statement_timeout, work_mem));
}

#[tokio::test]
async fn test_transaction_rolls_back_on_error() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;

    let result = pool
        .with_tenant(&ctx, |conn| {
            Box::pin(async move {
                let txn = conn.transaction(TransactionOptions::new()).await?;
                PatientRepository::create(&txn, &patient("TXN-1")).await?;
                PatientRepository::create(&txn, &patient("TXN-1")).await?;
                txn.commit().await
            })
        })
        .await;
    assert!(result.unwrap_err().is_constraint_violation());

    assert_eq!(count_patients(&pool, &ctx).await, 0);
    assert_pool_unbound(&pool).await;
}

#[tokio::test]
async fn test_transaction_commit_is_visible() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;

    pool.with_tenant(&ctx, |conn| {
        Box::pin(async move {
            let txn = conn
                .transaction(
                    TransactionOptions::new()
                        .isolation_level(ehr_persistence::core::IsolationLevel::Serializable),
                )
                .await?;
            PatientRepository::create(&txn, &patient("TXN-2")).await?;
            PatientRepository::create(&txn, &patient("TXN-3")).await?;
            txn.commit().await
        })
    })
    .await
    .unwrap();

    assert_eq!(count_patients(&pool, &ctx).await, 2);
}

#[tokio::test]
async fn test_read_only_transaction_rejects_writes() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;

    let err = pool
        .with_tenant(&ctx, |conn| {
            Box::pin(async move {
                let txn = conn
                    .transaction(TransactionOptions::new().read_only())
                    .await?;
                PatientRepository::create(&txn, &patient("RO-1")).await?;
                txn.commit().await
            })
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);

    assert_pool_unbound(&pool).await;
}

#[derive(Debug)]
enum ClinicError {
    Storage(StorageError),
    DuplicateVisit(String),
}

impl From<StorageError> for ClinicError {
    fn from(err: StorageError) -> Self {
        ClinicError::Storage(err)
    }
}

#[tokio::test]
async fn test_unit_of_work_error_passes_through() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;

    let result: Result<(), ClinicError> = pool
        .with_tenant(&ctx, |conn| {
            Box::pin(async move {
                let p = PatientRepository::create(&*conn, &patient("VISIT-1")).await?;
                Err::<(), _>(ClinicError::DuplicateVisit(p.mrn))
            })
        })
        .await;

    match result {
        Err(ClinicError::DuplicateVisit(mrn)) => assert_eq!(mrn, "VISIT-1"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_pool_unbound(&pool).await;

    // Scope failures reach the caller through the same From conversion.
    let missing = unique_tenant("missing");
    let result: Result<(), ClinicError> = pool
        .with_tenant(&missing, |_conn| {
            Box::pin(async move { Ok::<(), ClinicError>(()) })
        })
        .await;
    assert!(matches!(
        result,
        Err(ClinicError::Storage(StorageError::Tenant(
            TenantError::NotProvisioned { .. }
        )))
    ));
}

#[tokio::test]
async fn test_unprovisioned_tenant_fails_before_work() {
    let pool = create_single_connection_pool().await;
    let missing = unique_tenant("missing");

    let mut ran = false;
    let err = pool
        .with_tenant(&missing, |_conn| {
            ran = true;
            Box::pin(async move { Ok::<_, StorageError>(()) })
        })
        .await
        .unwrap_err();

    assert!(!ran);
    assert_eq!(err.kind(), ErrorKind::NotProvisioned);
    assert_ne!(err.kind(), ErrorKind::NotFound);
    assert_pool_unbound(&pool).await;
    assert_eq!(pool.status().size, 1);
}

#[tokio::test]
async fn test_cancel_during_execution() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = pool
        .with_tenant_options(
            &ctx,
            ScopeOptions::new().with_cancellation(token),
            |conn| {
                Box::pin(async move {
                    conn.execute("SELECT pg_sleep(30)", &[]).await?;
                    Ok::<_, StorageError>(())
                })
            },
        )
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(matches!(
        err,
        StorageError::Scope(ScopeError::Cancelled {
            phase: ScopePhase::Executing,
            ..
        })
    ));
    assert_pool_unbound(&pool).await;
}

#[tokio::test]
async fn test_deadline_during_execution() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;

    let started = Instant::now();
    let err = pool
        .with_tenant_options(
            &ctx,
            ScopeOptions::new().with_timeout(Duration::from_millis(300)),
            |conn| {
                Box::pin(async move {
                    conn.execute("SELECT pg_sleep(30)", &[]).await?;
                    Ok::<_, StorageError>(())
                })
            },
        )
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(
        err,
        StorageError::Scope(ScopeError::DeadlineExceeded {
            phase: ScopePhase::Executing,
            timeout_ms: 300,
            ..
        })
    ));
    assert_pool_unbound(&pool).await;
}

/// Holds the only pooled connection until `release` fires.
async fn hold_connection(
    pool: &ehr_persistence::TenantPool,
    ctx: &ehr_persistence::TenantContext,
) -> (oneshot::Sender<()>, tokio::task::JoinHandle<Result<(), StorageError>>) {
    let (held_tx, held_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let pool = pool.clone();
    let ctx = ctx.clone();

    let handle = tokio::spawn(async move {
        pool.with_tenant(&ctx, |_conn| {
            Box::pin(async move {
                let _ = held_tx.send(());
                let _ = release_rx.await;
                Ok::<_, StorageError>(())
            })
        })
        .await
    });
    held_rx.await.unwrap();
    (release_tx, handle)
}

#[tokio::test]
async fn test_deadline_while_acquiring() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;
    let (release, holder) = hold_connection(&pool, &ctx).await;

    let err = pool
        .with_tenant_options(
            &ctx,
            ScopeOptions::new().with_timeout(Duration::from_millis(200)),
            |_conn| Box::pin(async move { Ok::<_, StorageError>(()) }),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Scope(ScopeError::DeadlineExceeded {
            phase: ScopePhase::Acquiring,
            ..
        })
    ));

    release.send(()).unwrap();
    holder.await.unwrap().unwrap();
    assert_pool_unbound(&pool).await;
}

#[tokio::test]
async fn test_pool_exhaustion_is_unavailable() {
    let config = pg_config()
        .await
        .with_max_connections(1)
        .with_acquire_timeout_ms(200);
    let pool = create_pool_with(config).await;
    let ctx = provisioned_tenant(&pool, "scope").await;
    let (release, holder) = hold_connection(&pool, &ctx).await;

    let err = pool
        .with_tenant(&ctx, |_conn| {
            Box::pin(async move { Ok::<_, StorageError>(()) })
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(err.is_retryable());

    release.send(()).unwrap();
    holder.await.unwrap().unwrap();

    // Capacity comes back once the holder releases.
    assert_eq!(count_patients(&pool, &ctx).await, 0);
}

#[tokio::test]
async fn test_closed_pool_is_unavailable() {
    let pool = create_single_connection_pool().await;
    let ctx = provisioned_tenant(&pool, "scope").await;

    pool.close();
    assert!(pool.is_closed());

    let err = pool
        .with_tenant(&ctx, |_conn| {
            Box::pin(async move { Ok::<_, StorageError>(()) })
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}

#[tokio::test]
async fn test_invalid_schema_name_rejected_before_acquire() {
    let config = pg_config()
        .await
        .with_max_connections(1)
        .with_tenancy(
            ehr_persistence::SchemaPerTenantConfig::default()
                .with_prefix("a_rather_long_prefix_for_tenant_schemas_"),
        );
    let pool = create_pool_with(config).await;
    let ctx = unique_tenant("a-tenant-id-that-is-long-enough");

    let err = pool
        .with_tenant(&ctx, |_conn| {
            Box::pin(async move { Ok::<_, StorageError>(()) })
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(pool.status().waiting, 0);
}
