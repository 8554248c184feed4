//! PostgreSQL schema definitions for tenant and shared schemas.
//!
//! Tenant DDL is written without schema qualification: it runs after
//! `SET LOCAL search_path` points at the tenant schema, so every table,
//! index and foreign key lands in (and resolves within) that schema.

use deadpool_postgres::Transaction;

use crate::error::{BackendError, StorageError, StorageResult};

/// Current tenant schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Tenant tables, version 1.
const TENANT_SCHEMA_V1: &[(&str, &str)] = &[
    (
        "organizations",
        "CREATE TABLE IF NOT EXISTS organizations (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            parent_id UUID REFERENCES organizations(id),
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    ),
    (
        "practitioners",
        "CREATE TABLE IF NOT EXISTS practitioners (
            id UUID PRIMARY KEY,
            organization_id UUID REFERENCES organizations(id),
            family_name TEXT NOT NULL,
            given_name TEXT,
            npi TEXT UNIQUE,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    ),
    (
        "patients",
        "CREATE TABLE IF NOT EXISTS patients (
            id UUID PRIMARY KEY,
            mrn TEXT NOT NULL UNIQUE,
            family_name TEXT NOT NULL,
            given_name TEXT,
            birth_date DATE,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    ),
    (
        "encounters",
        "CREATE TABLE IF NOT EXISTS encounters (
            id UUID PRIMARY KEY,
            patient_id UUID NOT NULL REFERENCES patients(id),
            practitioner_id UUID REFERENCES practitioners(id),
            status TEXT NOT NULL
                CHECK (status IN ('planned', 'in-progress', 'finished', 'cancelled')),
            reason TEXT,
            started_at TIMESTAMPTZ,
            ended_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    ),
    (
        "appointments",
        "CREATE TABLE IF NOT EXISTS appointments (
            id UUID PRIMARY KEY,
            patient_id UUID NOT NULL REFERENCES patients(id),
            practitioner_id UUID REFERENCES practitioners(id),
            starts_at TIMESTAMPTZ NOT NULL,
            ends_at TIMESTAMPTZ NOT NULL,
            status TEXT NOT NULL,
            CHECK (ends_at > starts_at)
        )",
    ),
    (
        "clinical_orders",
        "CREATE TABLE IF NOT EXISTS clinical_orders (
            id UUID PRIMARY KEY,
            patient_id UUID NOT NULL REFERENCES patients(id),
            encounter_id UUID REFERENCES encounters(id),
            ordered_by UUID REFERENCES practitioners(id),
            code_system TEXT NOT NULL,
            code TEXT NOT NULL,
            status TEXT NOT NULL,
            ordered_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    ),
    (
        "cds_rules",
        "CREATE TABLE IF NOT EXISTS cds_rules (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            definition JSONB NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE
        )",
    ),
    (
        "cds_alerts",
        "CREATE TABLE IF NOT EXISTS cds_alerts (
            id UUID PRIMARY KEY,
            rule_id UUID NOT NULL REFERENCES cds_rules(id),
            patient_id UUID NOT NULL REFERENCES patients(id),
            severity TEXT NOT NULL,
            message TEXT NOT NULL,
            acknowledged_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    ),
    (
        "nursing_assessments",
        "CREATE TABLE IF NOT EXISTS nursing_assessments (
            id UUID PRIMARY KEY,
            patient_id UUID NOT NULL REFERENCES patients(id),
            encounter_id UUID REFERENCES encounters(id),
            assessed_by UUID REFERENCES practitioners(id),
            findings JSONB NOT NULL,
            assessed_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    ),
    (
        "care_plan_actions",
        "CREATE TABLE IF NOT EXISTS care_plan_actions (
            id UUID PRIMARY KEY,
            patient_id UUID NOT NULL REFERENCES patients(id),
            assigned_to UUID REFERENCES practitioners(id),
            description TEXT NOT NULL,
            status TEXT NOT NULL,
            due_at TIMESTAMPTZ
        )",
    ),
    (
        "portal_messages",
        "CREATE TABLE IF NOT EXISTS portal_messages (
            id UUID PRIMARY KEY,
            patient_id UUID NOT NULL REFERENCES patients(id),
            practitioner_id UUID REFERENCES practitioners(id),
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            sent_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            read_at TIMESTAMPTZ
        )",
    ),
];

/// Indexes on foreign-key and lookup columns.
const TENANT_INDEXES_V1: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_patients_family_name ON patients (lower(family_name))",
    "CREATE INDEX IF NOT EXISTS idx_encounters_patient ON encounters (patient_id)",
    "CREATE INDEX IF NOT EXISTS idx_appointments_patient ON appointments (patient_id, starts_at)",
    "CREATE INDEX IF NOT EXISTS idx_clinical_orders_patient ON clinical_orders (patient_id)",
    "CREATE INDEX IF NOT EXISTS idx_cds_alerts_patient ON cds_alerts (patient_id)",
    "CREATE INDEX IF NOT EXISTS idx_nursing_assessments_patient ON nursing_assessments (patient_id)",
    "CREATE INDEX IF NOT EXISTS idx_care_plan_actions_patient ON care_plan_actions (patient_id)",
    "CREATE INDEX IF NOT EXISTS idx_portal_messages_patient ON portal_messages (patient_id)",
];

/// Shared reference-data tables.
const SHARED_SCHEMA: &[&str] = &["CREATE TABLE IF NOT EXISTS code_systems (
        system TEXT NOT NULL,
        code TEXT NOT NULL,
        display TEXT NOT NULL,
        PRIMARY KEY (system, code)
    )"];

/// Names of the tables every tenant schema contains.
pub fn tenant_tables() -> impl Iterator<Item = &'static str> {
    TENANT_SCHEMA_V1
        .iter()
        .map(|(name, _)| *name)
        .chain(std::iter::once("schema_version"))
}

/// Reads the recorded version of the schema the transaction is pointed at.
///
/// Returns 0 for a schema without a version table.
pub(crate) async fn get_schema_version(txn: &Transaction<'_>) -> StorageResult<i32> {
    txn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        &[],
    )
    .await
    .map_err(|e| pg_error(format!("Failed to create schema_version table: {}", e)))?;

    let row = txn
        .query_opt("SELECT max(version) FROM schema_version", &[])
        .await
        .map_err(|e| pg_error(format!("Failed to query schema version: {}", e)))?;

    Ok(row.and_then(|r| r.get::<_, Option<i32>>(0)).unwrap_or(0))
}

async fn set_schema_version(txn: &Transaction<'_>, version: i32) -> StorageResult<()> {
    txn.execute("DELETE FROM schema_version", &[])
        .await
        .map_err(|e| pg_error(format!("Failed to clear schema_version: {}", e)))?;

    txn.execute(
        "INSERT INTO schema_version (version) VALUES ($1)",
        &[&version],
    )
    .await
    .map_err(|e| pg_error(format!("Failed to set schema_version: {}", e)))?;

    Ok(())
}

/// Brings the schema the transaction is pointed at up to [`SCHEMA_VERSION`].
///
/// Returns the version found before any change.
pub(crate) async fn migrate_tenant_schema(txn: &Transaction<'_>) -> StorageResult<i32> {
    let current = get_schema_version(txn).await?;

    if current > SCHEMA_VERSION {
        return Err(pg_error(format!(
            "schema is at version {} but this build supports up to {}",
            current, SCHEMA_VERSION
        )));
    }

    if current < 1 {
        create_schema_v1(txn).await?;
    }

    if current < SCHEMA_VERSION {
        set_schema_version(txn, SCHEMA_VERSION).await?;
    }

    Ok(current)
}

async fn create_schema_v1(txn: &Transaction<'_>) -> StorageResult<()> {
    for (table, ddl) in TENANT_SCHEMA_V1 {
        txn.execute(*ddl, &[])
            .await
            .map_err(|e| pg_error(format!("Failed to create {} table: {}", table, e)))?;
    }

    for ddl in TENANT_INDEXES_V1 {
        txn.execute(*ddl, &[])
            .await
            .map_err(|e| pg_error(format!("Failed to create index: {}", e)))?;
    }

    Ok(())
}

/// Creates the shared reference-data tables.
pub(crate) async fn create_shared_tables(txn: &Transaction<'_>) -> StorageResult<()> {
    for ddl in SHARED_SCHEMA {
        txn.execute(*ddl, &[])
            .await
            .map_err(|e| pg_error(format!("Failed to create shared table: {}", e)))?;
    }
    Ok(())
}

fn pg_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::MigrationError { message })
}
