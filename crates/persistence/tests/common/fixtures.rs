//! Test data builders.

use ehr_persistence::repository::NewPatient;
use ehr_persistence::tenant::TenantContext;

/// Creates a tenant context with a unique id so tests sharing the database
/// never see each other's schemas.
pub fn unique_tenant(label: &str) -> TenantContext {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let id = format!("{}-{}", label, &suffix[..12]);
    TenantContext::parse(&id)
        .expect("valid tenant id")
        .with_correlation_id(format!("test-{}", &suffix[..8]))
}

/// A patient with the given medical record number.
pub fn patient(mrn: &str) -> NewPatient {
    NewPatient::new(mrn, "Doe").with_given_name("Jordan")
}

/// A patient with the given medical record number and family name.
pub fn named_patient(mrn: &str, family_name: &str) -> NewPatient {
    NewPatient::new(mrn, family_name)
}
