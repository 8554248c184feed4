//! Patient records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use uuid::Uuid;

use super::filter::{FilterBuilder, escape_like};
use super::{column, not_found};
use crate::core::TenantExecutor;
use crate::error::{StorageResult, ValidationError};

const COLUMNS: &str =
    "id, mrn, family_name, given_name, birth_date, active, created_at, updated_at";

/// A stored patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    /// Row id, generated on insert.
    pub id: Uuid,
    /// Medical record number, unique within a tenant.
    pub mrn: String,
    /// Family name.
    pub family_name: String,
    /// Given name.
    pub given_name: Option<String>,
    /// Date of birth.
    pub birth_date: Option<NaiveDate>,
    /// Whether the record is in active use.
    pub active: bool,
    /// Insert time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    fn from_row(row: &Row) -> StorageResult<Self> {
        Ok(Self {
            id: column(row, "id")?,
            mrn: column(row, "mrn")?,
            family_name: column(row, "family_name")?,
            given_name: column(row, "given_name")?,
            birth_date: column(row, "birth_date")?,
            active: column(row, "active")?,
            created_at: column(row, "created_at")?,
            updated_at: column(row, "updated_at")?,
        })
    }
}

/// Fields supplied when registering a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPatient {
    /// Medical record number.
    pub mrn: String,
    /// Family name.
    pub family_name: String,
    /// Given name.
    #[serde(default)]
    pub given_name: Option<String>,
    /// Date of birth.
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
}

impl NewPatient {
    /// Creates a patient with only the required fields.
    pub fn new(mrn: impl Into<String>, family_name: impl Into<String>) -> Self {
        Self {
            mrn: mrn.into(),
            family_name: family_name.into(),
            given_name: None,
            birth_date: None,
        }
    }

    /// Sets the given name.
    pub fn with_given_name(mut self, given_name: impl Into<String>) -> Self {
        self.given_name = Some(given_name.into());
        self
    }

    /// Sets the birth date.
    pub fn with_birth_date(mut self, birth_date: NaiveDate) -> Self {
        self.birth_date = Some(birth_date);
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require("mrn", &self.mrn)?;
        require("family_name", &self.family_name)
    }
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingRequiredField {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Patient search criteria. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientFilter {
    /// Exact medical record number.
    pub mrn: Option<String>,
    /// Case-insensitive family name prefix.
    pub family_name: Option<String>,
    /// Active flag.
    pub active: Option<bool>,
    /// Maximum number of rows.
    pub limit: Option<i64>,
    /// Rows to skip.
    pub offset: Option<i64>,
}

impl PatientFilter {
    fn conditions(&self) -> FilterBuilder {
        let mut builder = FilterBuilder::new();
        builder
            .push_opt("mrn = {}", self.mrn.clone())
            .push_opt(
                "family_name ILIKE {}",
                self.family_name
                    .as_deref()
                    .map(|prefix| format!("{}%", escape_like(prefix))),
            )
            .push_opt("active = {}", self.active);
        builder
    }
}

/// Patient operations within the current tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatientRepository;

impl PatientRepository {
    /// Inserts a patient with a fresh id.
    ///
    /// A duplicate MRN within the tenant fails with
    /// [`ConstraintError::Unique`](crate::error::ConstraintError::Unique).
    pub async fn create(exec: &dyn TenantExecutor, new: &NewPatient) -> StorageResult<Patient> {
        new.validate()?;
        let id = Uuid::new_v4();
        let row = exec
            .query_one(
                &format!(
                    "INSERT INTO patients (id, mrn, family_name, given_name, birth_date)
                     VALUES ($1, $2, $3, $4, $5)
                     RETURNING {COLUMNS}"
                ),
                &[
                    &id,
                    &new.mrn,
                    &new.family_name,
                    &new.given_name,
                    &new.birth_date,
                ],
            )
            .await?;
        Patient::from_row(&row)
    }

    /// Looks up a patient by id.
    pub async fn get_by_id(exec: &dyn TenantExecutor, id: Uuid) -> StorageResult<Option<Patient>> {
        let row = exec
            .query_opt(
                &format!("SELECT {COLUMNS} FROM patients WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.as_ref().map(Patient::from_row).transpose()
    }

    /// Looks up a patient by medical record number.
    pub async fn get_by_mrn(exec: &dyn TenantExecutor, mrn: &str) -> StorageResult<Option<Patient>> {
        let row = exec
            .query_opt(
                &format!("SELECT {COLUMNS} FROM patients WHERE mrn = $1"),
                &[&mrn],
            )
            .await?;
        row.as_ref().map(Patient::from_row).transpose()
    }

    /// Writes every mutable field of `patient` and bumps `updated_at`.
    pub async fn update(exec: &dyn TenantExecutor, patient: &Patient) -> StorageResult<Patient> {
        require("mrn", &patient.mrn)?;
        require("family_name", &patient.family_name)?;

        let row = exec
            .query_opt(
                &format!(
                    "UPDATE patients
                     SET mrn = $2, family_name = $3, given_name = $4, birth_date = $5,
                         active = $6, updated_at = now()
                     WHERE id = $1
                     RETURNING {COLUMNS}"
                ),
                &[
                    &patient.id,
                    &patient.mrn,
                    &patient.family_name,
                    &patient.given_name,
                    &patient.birth_date,
                    &patient.active,
                ],
            )
            .await?;

        match row {
            Some(row) => Patient::from_row(&row),
            None => Err(not_found("patient", patient.id)),
        }
    }

    /// Deletes a patient.
    ///
    /// Fails with a foreign key violation while encounters still reference it.
    pub async fn delete(exec: &dyn TenantExecutor, id: Uuid) -> StorageResult<()> {
        let deleted = exec
            .execute("DELETE FROM patients WHERE id = $1", &[&id])
            .await?;
        if deleted == 0 {
            return Err(not_found("patient", id));
        }
        Ok(())
    }

    /// Lists patients ordered by family name, given name, then id.
    pub async fn list(
        exec: &dyn TenantExecutor,
        filter: &PatientFilter,
    ) -> StorageResult<Vec<Patient>> {
        let mut builder = filter.conditions();
        let paging = builder.paging(filter.limit, filter.offset);
        let sql = format!(
            "SELECT {COLUMNS} FROM patients{} ORDER BY family_name, given_name, id{}",
            builder.where_clause(),
            paging
        );

        let rows = exec.query(&sql, &builder.params()).await?;
        rows.iter().map(Patient::from_row).collect()
    }

    /// Counts patients matching the filter. Paging fields are ignored.
    pub async fn count(exec: &dyn TenantExecutor, filter: &PatientFilter) -> StorageResult<i64> {
        let builder = filter.conditions();
        let sql = format!("SELECT count(*) FROM patients{}", builder.where_clause());

        let row = exec.query_one(&sql, &builder.params()).await?;
        column(&row, "count")
    }
}
