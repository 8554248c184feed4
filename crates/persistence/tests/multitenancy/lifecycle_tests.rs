//! Tests for tenant provisioning and deprovisioning.

use ehr_persistence::core::{ProvisionOutcome, SchemaLifecycle};
use ehr_persistence::error::{ErrorKind, StorageError};
use ehr_persistence::repository::{PatientFilter, PatientRepository};
use ehr_persistence::tenant::TenantId;
use ehr_persistence::backends::postgres::schema::SCHEMA_VERSION;

use crate::common::{create_pool, patient, unique_tenant};

#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let pool = create_pool().await;
    let ctx = unique_tenant("lifecycle");

    assert!(!pool.is_provisioned(ctx.tenant_id()).await.unwrap());
    assert_eq!(pool.schema_version(ctx.tenant_id()).await.unwrap(), None);

    let first = pool.provision_tenant(ctx.tenant_id()).await.unwrap();
    assert_eq!(first, ProvisionOutcome::Created);

    pool.with_tenant(&ctx, |conn| {
        Box::pin(async move { PatientRepository::create(&*conn, &patient("KEEP-1")).await })
    })
    .await
    .unwrap();

    let second = pool.provision_tenant(ctx.tenant_id()).await.unwrap();
    assert_eq!(second, ProvisionOutcome::AlreadyProvisioned);

    let remaining = pool
        .with_tenant(&ctx, |conn| {
            Box::pin(async move { PatientRepository::list(&*conn, &PatientFilter::default()).await })
        })
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].mrn, "KEEP-1");

    assert!(pool.is_provisioned(ctx.tenant_id()).await.unwrap());
    assert_eq!(
        pool.schema_version(ctx.tenant_id()).await.unwrap(),
        Some(SCHEMA_VERSION)
    );
}

#[tokio::test]
async fn test_concurrent_provisioning_creates_once() {
    let pool = create_pool().await;
    let ctx = unique_tenant("lifecycle");

    let (a, b) = tokio::join!(
        pool.provision_tenant(ctx.tenant_id()),
        pool.provision_tenant(ctx.tenant_id())
    );
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| o.to_string());

    assert_eq!(
        outcomes,
        vec![ProvisionOutcome::AlreadyProvisioned, ProvisionOutcome::Created]
    );
}

#[tokio::test]
async fn test_every_tenant_gets_the_full_table_set() {
    let pool = create_pool().await;
    let ctx = unique_tenant("lifecycle");
    pool.provision_tenant(ctx.tenant_id()).await.unwrap();

    let schema = pool.schema_for(ctx.tenant_id()).as_str().to_string();
    let tables: Vec<String> = pool
        .with_shared(|conn| {
            Box::pin(async move {
                let rows = ehr_persistence::TenantExecutor::query(
                    &*conn,
                    "SELECT tablename::text FROM pg_catalog.pg_tables
                     WHERE schemaname = $1 ORDER BY tablename",
                    &[&schema],
                )
                .await?;
                Ok::<_, StorageError>(rows.iter().map(|r| r.get(0)).collect())
            })
        })
        .await
        .unwrap();

    let mut expected: Vec<String> = ehr_persistence::backends::postgres::schema::tenant_tables()
        .map(str::to_string)
        .collect();
    expected.sort();
    assert_eq!(tables, expected);
}

#[tokio::test]
async fn test_deprovision_removes_tenant() {
    let pool = create_pool().await;
    let ctx = unique_tenant("lifecycle");
    pool.provision_tenant(ctx.tenant_id()).await.unwrap();

    assert!(pool.list_tenants().await.unwrap().contains(ctx.tenant_id()));

    pool.deprovision_tenant(ctx.tenant_id()).await.unwrap();

    assert!(!pool.is_provisioned(ctx.tenant_id()).await.unwrap());
    assert!(!pool.list_tenants().await.unwrap().contains(ctx.tenant_id()));

    let err = pool
        .with_tenant(&ctx, |conn| {
            Box::pin(async move { PatientRepository::count(&*conn, &PatientFilter::default()).await })
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotProvisioned);

    let again = pool.deprovision_tenant(ctx.tenant_id()).await.unwrap_err();
    assert_eq!(again.kind(), ErrorKind::NotProvisioned);
}

#[tokio::test]
async fn test_system_tenant_cannot_be_provisioned() {
    let pool = create_pool().await;

    let err = pool.provision_tenant(&TenantId::system()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = pool
        .deprovision_tenant(&TenantId::system())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_shared_schema_init_is_idempotent() {
    let pool = create_pool().await;
    pool.init_shared_schema().await.unwrap();
    pool.init_shared_schema().await.unwrap();

    // The shared schema never appears as a tenant.
    let tenants = pool.list_tenants().await.unwrap();
    assert!(tenants.iter().all(|t| !t.is_system()));
}
