//! Tests for tenant data isolation.
//!
//! Rows written in one tenant's scope are never observable from another
//! tenant's scope, by count, by id or by natural key.

use std::collections::HashSet;

use ehr_persistence::StorageError;
use ehr_persistence::repository::{PatientFilter, PatientRepository};
use uuid::Uuid;

use crate::common::{create_pool, patient, provisioned_tenant};

#[tokio::test]
async fn test_same_mrn_in_two_tenants() {
    let pool = create_pool().await;
    let tenant_a = provisioned_tenant(&pool, "tenant-a").await;
    let tenant_b = provisioned_tenant(&pool, "tenant-b").await;

    let p1 = pool
        .with_tenant(&tenant_a, |conn| {
            Box::pin(async move { PatientRepository::create(&*conn, &patient("X")).await })
        })
        .await
        .unwrap();
    let p2 = pool
        .with_tenant(&tenant_b, |conn| {
            Box::pin(async move { PatientRepository::create(&*conn, &patient("X")).await })
        })
        .await
        .unwrap();
    assert_ne!(p1.id, p2.id);

    let count_a = pool
        .with_tenant(&tenant_a, |conn| {
            Box::pin(async move { PatientRepository::count(&*conn, &PatientFilter::default()).await })
        })
        .await
        .unwrap();
    let count_b = pool
        .with_tenant(&tenant_b, |conn| {
            Box::pin(async move { PatientRepository::count(&*conn, &PatientFilter::default()).await })
        })
        .await
        .unwrap();
    assert_eq!(count_a, 1);
    assert_eq!(count_b, 1);

    let p1_id = p1.id;
    let p1_from_b = pool
        .with_tenant(&tenant_b, |conn| {
            Box::pin(async move { PatientRepository::get_by_id(&*conn, p1_id).await })
        })
        .await
        .unwrap();
    assert!(p1_from_b.is_none());

    // The natural key resolves independently in each tenant.
    let (by_mrn_a, by_mrn_b) = (
        pool.with_tenant(&tenant_a, |conn| {
            Box::pin(async move { PatientRepository::get_by_mrn(&*conn, "X").await })
        })
        .await
        .unwrap(),
        pool.with_tenant(&tenant_b, |conn| {
            Box::pin(async move { PatientRepository::get_by_mrn(&*conn, "X").await })
        })
        .await
        .unwrap(),
    );
    assert_eq!(by_mrn_a.map(|p| p.id), Some(p1.id));
    assert_eq!(by_mrn_b.map(|p| p.id), Some(p2.id));
}

#[tokio::test]
async fn test_rows_invisible_to_other_tenant() {
    let pool = create_pool().await;
    let tenant_a = provisioned_tenant(&pool, "tenant-a").await;
    let tenant_b = provisioned_tenant(&pool, "tenant-b").await;

    let created = pool
        .with_tenant(&tenant_a, |conn| {
            Box::pin(async move {
                let mut ids = Vec::new();
                for i in 0..3 {
                    let p = PatientRepository::create(&*conn, &patient(&format!("A-{i}"))).await?;
                    ids.push(p.id);
                }
                Ok::<_, StorageError>(ids)
            })
        })
        .await
        .unwrap();

    let (count, listed, found) = pool
        .with_tenant(&tenant_b, |conn| {
            Box::pin(async move {
                let count = PatientRepository::count(&*conn, &PatientFilter::default()).await?;
                let listed = PatientRepository::list(&*conn, &PatientFilter::default()).await?;
                let mut found = 0;
                for id in created {
                    if PatientRepository::get_by_id(&*conn, id).await?.is_some() {
                        found += 1;
                    }
                }
                Ok::<_, StorageError>((count, listed, found))
            })
        })
        .await
        .unwrap();

    assert_eq!(count, 0);
    assert!(listed.is_empty());
    assert_eq!(found, 0);
}

#[tokio::test]
async fn test_update_and_delete_cannot_reach_other_tenant() {
    let pool = create_pool().await;
    let tenant_a = provisioned_tenant(&pool, "tenant-a").await;
    let tenant_b = provisioned_tenant(&pool, "tenant-b").await;

    let p1 = pool
        .with_tenant(&tenant_a, |conn| {
            Box::pin(async move { PatientRepository::create(&*conn, &patient("SHARED-MRN")).await })
        })
        .await
        .unwrap();

    let mut renamed = p1.clone();
    renamed.family_name = "Hijacked".to_string();
    let update_err = pool
        .with_tenant(&tenant_b, |conn| {
            Box::pin(async move { PatientRepository::update(&*conn, &renamed).await })
        })
        .await
        .unwrap_err();
    assert_eq!(update_err.kind(), ehr_persistence::ErrorKind::NotFound);

    let p1_id = p1.id;
    let delete_err = pool
        .with_tenant(&tenant_b, |conn| {
            Box::pin(async move { PatientRepository::delete(&*conn, p1_id).await })
        })
        .await
        .unwrap_err();
    assert_eq!(delete_err.kind(), ehr_persistence::ErrorKind::NotFound);

    let unchanged = pool
        .with_tenant(&tenant_a, |conn| {
            Box::pin(async move { PatientRepository::get_by_id(&*conn, p1_id).await })
        })
        .await
        .unwrap()
        .expect("patient still present");
    assert_eq!(unchanged.family_name, "Doe");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scopes_stay_isolated() {
    const TASKS: usize = 32;
    const TENANTS: usize = 4;
    const WRITES_PER_TASK: usize = 4;

    let pool = create_pool().await;
    let mut tenants = Vec::new();
    for i in 0..TENANTS {
        tenants.push(provisioned_tenant(&pool, &format!("conc-{i}")).await);
    }

    let mut handles = Vec::new();
    for task in 0..TASKS {
        let pool = pool.clone();
        let tenant_index = task % TENANTS;
        let ctx = tenants[tenant_index].clone();
        handles.push(tokio::spawn(async move {
            for write in 0..WRITES_PER_TASK {
                let mrn = format!("T{tenant_index}-{task}-{write}");
                pool.with_tenant(&ctx, |conn| {
                    Box::pin(async move { PatientRepository::create(&*conn, &patient(&mrn)).await })
                })
                .await?;
            }
            Ok::<_, StorageError>(())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for (index, ctx) in tenants.iter().enumerate() {
        let patients = pool
            .with_tenant(ctx, |conn| {
                Box::pin(async move { PatientRepository::list(&*conn, &PatientFilter::default()).await })
            })
            .await
            .unwrap();

        assert_eq!(patients.len(), TASKS / TENANTS * WRITES_PER_TASK);
        let prefix = format!("T{index}-");
        assert!(patients.iter().all(|p| p.mrn.starts_with(&prefix)));
        let unique: HashSet<Uuid> = patients.iter().map(|p| p.id).collect();
        assert_eq!(unique.len(), patients.len());
    }

    crate::common::assert_pool_unbound(&pool).await;
}
