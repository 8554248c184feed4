//! Encounters.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use uuid::Uuid;

use super::filter::FilterBuilder;
use super::{column, not_found};
use crate::core::TenantExecutor;
use crate::error::{BackendError, StorageError, StorageResult, ValidationError};

const COLUMNS: &str =
    "id, patient_id, practitioner_id, status, reason, started_at, ended_at, created_at";

/// Encounter status, stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncounterStatus {
    /// Scheduled, not started.
    Planned,
    /// Underway.
    InProgress,
    /// Completed.
    Finished,
    /// Called off before completion.
    Cancelled,
}

impl EncounterStatus {
    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EncounterStatus::Planned => "planned",
            EncounterStatus::InProgress => "in-progress",
            EncounterStatus::Finished => "finished",
            EncounterStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EncounterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncounterStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(EncounterStatus::Planned),
            "in-progress" => Ok(EncounterStatus::InProgress),
            "finished" => Ok(EncounterStatus::Finished),
            "cancelled" => Ok(EncounterStatus::Cancelled),
            other => Err(ValidationError::InvalidValue {
                field: "status".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// A stored encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encounter {
    /// Row id, generated on insert.
    pub id: Uuid,
    /// Patient seen, in the same tenant.
    pub patient_id: Uuid,
    /// Attending practitioner.
    pub practitioner_id: Option<Uuid>,
    /// Current status.
    pub status: EncounterStatus,
    /// Reason for the visit.
    pub reason: Option<String>,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// End time, stamped when the encounter finishes.
    pub ended_at: Option<DateTime<Utc>>,
    /// Insert time.
    pub created_at: DateTime<Utc>,
}

impl Encounter {
    fn from_row(row: &Row) -> StorageResult<Self> {
        let status: String = column(row, "status")?;
        let status = status.parse().map_err(|e: ValidationError| {
            StorageError::Backend(BackendError::Decode {
                column: "status".to_string(),
                message: e.to_string(),
            })
        })?;

        Ok(Self {
            id: column(row, "id")?,
            patient_id: column(row, "patient_id")?,
            practitioner_id: column(row, "practitioner_id")?,
            status,
            reason: column(row, "reason")?,
            started_at: column(row, "started_at")?,
            ended_at: column(row, "ended_at")?,
            created_at: column(row, "created_at")?,
        })
    }
}

/// Fields supplied when opening an encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEncounter {
    /// Patient seen.
    pub patient_id: Uuid,
    /// Attending practitioner.
    #[serde(default)]
    pub practitioner_id: Option<Uuid>,
    /// Initial status.
    pub status: EncounterStatus,
    /// Reason for the visit.
    #[serde(default)]
    pub reason: Option<String>,
    /// Start time.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl NewEncounter {
    /// Creates an encounter for a patient.
    pub fn new(patient_id: Uuid, status: EncounterStatus) -> Self {
        Self {
            patient_id,
            practitioner_id: None,
            status,
            reason: None,
            started_at: None,
        }
    }

    /// Sets the reason for the visit.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the start time.
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }
}

/// Encounter search criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncounterFilter {
    /// Patient seen.
    pub patient_id: Option<Uuid>,
    /// Current status.
    pub status: Option<EncounterStatus>,
    /// Maximum number of rows.
    pub limit: Option<i64>,
    /// Rows to skip.
    pub offset: Option<i64>,
}

impl EncounterFilter {
    /// Matches every encounter of one patient.
    pub fn for_patient(patient_id: Uuid) -> Self {
        Self {
            patient_id: Some(patient_id),
            ..Default::default()
        }
    }

    fn conditions(&self) -> FilterBuilder {
        let mut builder = FilterBuilder::new();
        builder
            .push_opt("patient_id = {}", self.patient_id)
            .push_opt("status = {}", self.status.map(|s| s.as_str().to_string()));
        builder
    }
}

/// Encounter operations within the current tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncounterRepository;

impl EncounterRepository {
    /// Inserts an encounter.
    ///
    /// The patient must exist in the same tenant; otherwise the insert fails
    /// with [`ConstraintError::ForeignKey`](crate::error::ConstraintError::ForeignKey).
    pub async fn create(
        exec: &dyn TenantExecutor,
        new: &NewEncounter,
    ) -> StorageResult<Encounter> {
        let id = Uuid::new_v4();
        let row = exec
            .query_one(
                &format!(
                    "INSERT INTO encounters (id, patient_id, practitioner_id, status, reason, started_at)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     RETURNING {COLUMNS}"
                ),
                &[
                    &id,
                    &new.patient_id,
                    &new.practitioner_id,
                    &new.status.as_str(),
                    &new.reason,
                    &new.started_at,
                ],
            )
            .await?;
        Encounter::from_row(&row)
    }

    /// Looks up an encounter by id.
    pub async fn get_by_id(
        exec: &dyn TenantExecutor,
        id: Uuid,
    ) -> StorageResult<Option<Encounter>> {
        let row = exec
            .query_opt(
                &format!("SELECT {COLUMNS} FROM encounters WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.as_ref().map(Encounter::from_row).transpose()
    }

    /// Moves an encounter to a new status. Finishing stamps `ended_at`.
    pub async fn update_status(
        exec: &dyn TenantExecutor,
        id: Uuid,
        status: EncounterStatus,
    ) -> StorageResult<Encounter> {
        let row = exec
            .query_opt(
                &format!(
                    "UPDATE encounters
                     SET status = $2,
                         ended_at = CASE WHEN $2 = 'finished' THEN coalesce(ended_at, now())
                                         ELSE ended_at END
                     WHERE id = $1
                     RETURNING {COLUMNS}"
                ),
                &[&id, &status.as_str()],
            )
            .await?;

        match row {
            Some(row) => Encounter::from_row(&row),
            None => Err(not_found("encounter", id)),
        }
    }

    /// Deletes an encounter.
    pub async fn delete(exec: &dyn TenantExecutor, id: Uuid) -> StorageResult<()> {
        let deleted = exec
            .execute("DELETE FROM encounters WHERE id = $1", &[&id])
            .await?;
        if deleted == 0 {
            return Err(not_found("encounter", id));
        }
        Ok(())
    }

    /// Lists encounters, most recently created first.
    pub async fn list(
        exec: &dyn TenantExecutor,
        filter: &EncounterFilter,
    ) -> StorageResult<Vec<Encounter>> {
        let mut builder = filter.conditions();
        let paging = builder.paging(filter.limit, filter.offset);
        let sql = format!(
            "SELECT {COLUMNS} FROM encounters{} ORDER BY created_at DESC, id{}",
            builder.where_clause(),
            paging
        );

        let rows = exec.query(&sql, &builder.params()).await?;
        rows.iter().map(Encounter::from_row).collect()
    }
}
