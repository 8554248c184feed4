//! Tests for cross-tenant access prevention.

use ehr_persistence::error::{ConstraintError, ErrorKind, StorageError, ValidationError};
use ehr_persistence::repository::{
    CodeSystemEntry, CodeSystemRepository, EncounterRepository, EncounterStatus, NewEncounter,
    PatientRepository,
};
use ehr_persistence::{TenantExecutor, TransactionOptions};

use crate::common::{assert_pool_unbound, create_pool, patient, provisioned_tenant};

#[tokio::test]
async fn test_foreign_key_to_other_tenant_is_rejected() {
    let pool = create_pool().await;
    let tenant_a = provisioned_tenant(&pool, "tenant-a").await;
    let tenant_b = provisioned_tenant(&pool, "tenant-b").await;

    let p1 = pool
        .with_tenant(&tenant_a, |conn| {
            Box::pin(async move { PatientRepository::create(&*conn, &patient("X")).await })
        })
        .await
        .unwrap();

    let p1_id = p1.id;
    let err = pool
        .with_tenant(&tenant_b, |conn| {
            Box::pin(async move {
                EncounterRepository::create(
                    &*conn,
                    &NewEncounter::new(p1_id, EncounterStatus::Planned),
                )
                .await
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    assert!(err.is_foreign_key_violation());
    assert!(matches!(
        err,
        StorageError::Constraint(ConstraintError::ForeignKey { .. })
    ));

    // The same reference resolves inside the owning tenant.
    let encounter = pool
        .with_tenant(&tenant_a, |conn| {
            Box::pin(async move {
                EncounterRepository::create(
                    &*conn,
                    &NewEncounter::new(p1_id, EncounterStatus::Planned),
                )
                .await
            })
        })
        .await
        .unwrap();
    assert_eq!(encounter.patient_id, p1_id);
}

#[tokio::test]
async fn test_foreign_key_rejected_inside_transaction() {
    let pool = create_pool().await;
    let tenant_a = provisioned_tenant(&pool, "tenant-a").await;
    let tenant_b = provisioned_tenant(&pool, "tenant-b").await;

    let p1 = pool
        .with_tenant(&tenant_a, |conn| {
            Box::pin(async move { PatientRepository::create(&*conn, &patient("FK-1")).await })
        })
        .await
        .unwrap();

    // Even inside an explicit transaction, the reference does not resolve.
    let p1_id = p1.id;
    let err = pool
        .with_tenant(&tenant_b, |conn| {
            Box::pin(async move {
                let txn = conn.transaction(TransactionOptions::new()).await?;
                EncounterRepository::create(
                    &txn,
                    &NewEncounter::new(p1_id, EncounterStatus::InProgress),
                )
                .await?;
                txn.commit().await
            })
        })
        .await
        .unwrap_err();
    assert!(err.is_foreign_key_violation());

    assert_pool_unbound(&pool).await;
}

#[tokio::test]
async fn test_shared_reference_data_visible_from_tenants() {
    let pool = create_pool().await;
    let tenant_a = provisioned_tenant(&pool, "tenant-a").await;
    let tenant_b = provisioned_tenant(&pool, "tenant-b").await;

    let code = format!("test-{}", uuid::Uuid::new_v4().simple());
    let entry = CodeSystemEntry::new("http://loinc.org", code.clone(), "Heart rate");
    pool.with_shared(|conn| {
        Box::pin(async move { CodeSystemRepository::upsert(&*conn, &entry).await })
    })
    .await
    .unwrap();

    for ctx in [&tenant_a, &tenant_b] {
        let code = code.clone();
        let found = pool
            .with_tenant(ctx, |conn| {
                Box::pin(async move {
                    CodeSystemRepository::lookup(&*conn, "http://loinc.org", &code).await
                })
            })
            .await
            .unwrap()
            .expect("shared code visible");
        assert_eq!(found.display, "Heart rate");
    }
}

#[tokio::test]
async fn test_tenant_cannot_write_reference_data() {
    let pool = create_pool().await;
    let tenant = provisioned_tenant(&pool, "tenant-a").await;

    let entry = CodeSystemEntry::new("http://loinc.org", "8867-4", "Heart rate");
    let err = pool
        .with_tenant(&tenant, |conn| {
            Box::pin(async move { CodeSystemRepository::upsert(&*conn, &entry).await })
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_shared_scope_cannot_see_tenant_tables() {
    let pool = create_pool().await;
    let _tenant = provisioned_tenant(&pool, "tenant-a").await;

    let result = pool
        .with_shared(|conn| {
            Box::pin(async move { conn.query_one("SELECT count(*) FROM patients", &[]).await })
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_binding_changes_are_rejected() {
    let pool = create_pool().await;
    let tenant_a = provisioned_tenant(&pool, "tenant-a").await;
    let tenant_b = provisioned_tenant(&pool, "tenant-b").await;

    let other_schema = pool.schema_for(tenant_b.tenant_id()).quoted();
    let statements = vec![
        format!("SET search_path TO {other_schema}"),
        format!("set local search_path = {other_schema}"),
        "RESET ALL".to_string(),
        "DISCARD ALL".to_string(),
        "SET ROLE postgres".to_string(),
        "COMMIT".to_string(),
        format!("SELECT set_config('search_path', '{other_schema}', false)"),
    ];

    for sql in statements {
        let err = pool
            .with_tenant(&tenant_a, |conn| {
                Box::pin(async move { conn.execute(&sql, &[]).await })
            })
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                StorageError::Validation(ValidationError::ForbiddenStatement { .. })
            ),
            "statement was not rejected: {err}"
        );
    }

    assert_pool_unbound(&pool).await;
}
