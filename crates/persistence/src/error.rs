//! Error types for the persistence layer.
//!
//! This module defines all error types used throughout the persistence layer,
//! following a hierarchy that separates tenant errors, validation errors,
//! constraint violations, scope interruptions, and backend errors.
//!
//! Every error maps onto a coarse [`ErrorKind`] so callers can branch on the
//! category (for example "retry later" versus "tenant not provisioned")
//! without matching on individual variants.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;
use tokio_postgres::error::SqlState;

use crate::tenant::TenantId;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Tenant isolation errors
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Row state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Integrity constraint violations reported by the database
    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    /// Cancellation and deadline errors raised by a tenant scope
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Coarse classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input rejected before any resource was touched.
    Validation,
    /// The pool or the database could not serve the request.
    Unavailable,
    /// The tenant has no schema in this database.
    NotProvisioned,
    /// The database rejected a write through an integrity constraint.
    ConstraintViolation,
    /// The addressed row does not exist in the current tenant.
    NotFound,
    /// The caller cancelled the scope.
    Cancelled,
    /// The scope ran past its deadline.
    DeadlineExceeded,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::NotProvisioned => "not-provisioned",
            ErrorKind::ConstraintViolation => "constraint-violation",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DeadlineExceeded => "deadline-exceeded",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

impl StorageError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Tenant(TenantError::NotProvisioned { .. }) => ErrorKind::NotProvisioned,
            StorageError::Validation(_) => ErrorKind::Validation,
            StorageError::Resource(ResourceError::NotFound { .. }) => ErrorKind::NotFound,
            StorageError::Constraint(_) => ErrorKind::ConstraintViolation,
            StorageError::Scope(ScopeError::Cancelled { .. }) => ErrorKind::Cancelled,
            StorageError::Scope(ScopeError::DeadlineExceeded { .. }) => {
                ErrorKind::DeadlineExceeded
            }
            StorageError::Backend(
                BackendError::PoolExhausted { .. }
                | BackendError::PoolClosed
                | BackendError::ConnectionFailed { .. }
                | BackendError::ConnectionLost { .. }
                | BackendError::Unavailable { .. },
            ) => ErrorKind::Unavailable,
            StorageError::Backend(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` if repeating the same call later may succeed.
    ///
    /// The tenant scope never retries on its own; this is the hook callers
    /// use to decide on backoff.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }

    /// Returns `true` for integrity constraint violations.
    pub fn is_constraint_violation(&self) -> bool {
        self.kind() == ErrorKind::ConstraintViolation
    }

    /// Returns `true` for foreign-key violations specifically.
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, StorageError::Constraint(ConstraintError::ForeignKey { .. }))
    }
}

/// Errors related to tenant isolation.
#[derive(Error, Debug)]
pub enum TenantError {
    /// The tenant schema does not exist.
    #[error("tenant not provisioned: {tenant_id} (schema {schema})")]
    NotProvisioned { tenant_id: TenantId, schema: String },
}

/// Errors raised before any connection is touched.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The tenant identifier does not satisfy the naming rules.
    #[error("invalid tenant id '{input}': {reason}")]
    InvalidTenantId { input: String, reason: String },

    /// The derived schema name is not a valid identifier.
    #[error("invalid schema name '{schema}': {reason}")]
    InvalidSchemaName { schema: String, reason: String },

    /// Tenancy configuration is inconsistent.
    #[error("invalid tenancy configuration: {message}")]
    InvalidConfiguration { message: String },

    /// A statement tried to change transaction or schema-binding state.
    #[error("statement not allowed inside a tenant scope ({reason}): {statement}")]
    ForbiddenStatement { statement: String, reason: String },

    /// Missing required field.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },

    /// A stored or supplied value is outside its domain.
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// Errors related to row state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested row was not found in the current tenant.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },
}

/// Integrity constraint violations reported by the database engine.
#[derive(Error, Debug)]
pub enum ConstraintError {
    /// A foreign key did not resolve inside the current tenant schema.
    #[error("foreign key violation on {}: {message}", display_target(.table, .constraint))]
    ForeignKey {
        table: Option<String>,
        constraint: Option<String>,
        message: String,
    },

    /// A unique constraint rejected a duplicate.
    #[error("unique violation on {}: {message}", display_target(.table, .constraint))]
    Unique {
        table: Option<String>,
        constraint: Option<String>,
        message: String,
    },

    /// A NOT NULL column received no value.
    #[error("not-null violation on {}: {message}", display_target(.table, .column))]
    NotNull {
        table: Option<String>,
        column: Option<String>,
        message: String,
    },

    /// A CHECK constraint rejected the row.
    #[error("check violation on {}: {message}", display_target(.table, .constraint))]
    Check {
        table: Option<String>,
        constraint: Option<String>,
        message: String,
    },
}

fn display_target(table: &Option<String>, detail: &Option<String>) -> String {
    match (table, detail) {
        (Some(t), Some(d)) => format!("{}.{}", t, d),
        (Some(t), None) => t.clone(),
        (None, Some(d)) => d.clone(),
        (None, None) => "unknown".to_string(),
    }
}

/// Phases of a tenant scope, attached to scope errors for context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopePhase {
    /// Waiting for a pooled connection.
    Acquiring,
    /// Binding the connection to the tenant schema.
    Binding,
    /// Running the unit of work.
    Executing,
}

impl fmt::Display for ScopePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopePhase::Acquiring => write!(f, "acquiring"),
            ScopePhase::Binding => write!(f, "binding"),
            ScopePhase::Executing => write!(f, "executing"),
        }
    }
}

/// Interruptions of a tenant scope.
#[derive(Error, Debug)]
pub enum ScopeError {
    /// The caller's cancellation token fired.
    #[error("tenant scope for {tenant_id} cancelled while {phase}")]
    Cancelled { tenant_id: TenantId, phase: ScopePhase },

    /// The scope deadline elapsed.
    #[error("tenant scope for {tenant_id} exceeded its {timeout_ms}ms deadline while {phase}")]
    DeadlineExceeded {
        tenant_id: TenantId,
        phase: ScopePhase,
        timeout_ms: u64,
    },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is currently unavailable.
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    /// No pooled connection became free within the wait timeout.
    #[error("connection pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    /// The pool has been shut down.
    #[error("connection pool is closed")]
    PoolClosed,

    /// Opening a new physical connection failed.
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The connection died while in use.
    #[error("connection lost: {message}")]
    ConnectionLost { message: String },

    /// The server cancelled the running statement.
    #[error("query cancelled: {message}")]
    QueryCancelled { message: String },

    /// Schema provisioning or migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Row decoding error.
    #[error("failed to decode column {column}: {message}")]
    Decode { column: String, message: String },

    /// Internal backend error.
    #[error("internal database error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Classifies a database-reported SQLSTATE into a typed error, if it is one
/// the isolation layer distinguishes.
pub(crate) fn classify_db_error(
    code: &SqlState,
    table: Option<&str>,
    constraint: Option<&str>,
    column: Option<&str>,
    message: &str,
) -> Option<StorageError> {
    let table = table.map(str::to_string);
    let message = message.to_string();

    let err = if *code == SqlState::FOREIGN_KEY_VIOLATION {
        ConstraintError::ForeignKey {
            table,
            constraint: constraint.map(str::to_string),
            message,
        }
        .into()
    } else if *code == SqlState::UNIQUE_VIOLATION {
        ConstraintError::Unique {
            table,
            constraint: constraint.map(str::to_string),
            message,
        }
        .into()
    } else if *code == SqlState::NOT_NULL_VIOLATION {
        ConstraintError::NotNull {
            table,
            column: column.map(str::to_string),
            message,
        }
        .into()
    } else if *code == SqlState::CHECK_VIOLATION {
        ConstraintError::Check {
            table,
            constraint: constraint.map(str::to_string),
            message,
        }
        .into()
    } else if *code == SqlState::QUERY_CANCELED {
        BackendError::QueryCancelled { message }.into()
    } else if *code == SqlState::ADMIN_SHUTDOWN
        || *code == SqlState::CRASH_SHUTDOWN
        || *code == SqlState::CANNOT_CONNECT_NOW
    {
        BackendError::ConnectionLost { message }.into()
    } else {
        return None;
    };

    Some(err)
}

impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            if let Some(classified) = classify_db_error(
                db.code(),
                db.table(),
                db.constraint(),
                db.column(),
                db.message(),
            ) {
                return classified;
            }
        }

        if err.is_closed() {
            return StorageError::Backend(BackendError::ConnectionLost {
                message: err.to_string(),
            });
        }

        StorageError::Backend(BackendError::Internal {
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

impl From<deadpool_postgres::PoolError> for StorageError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        use deadpool_postgres::PoolError;

        match err {
            PoolError::Timeout(_) => {
                StorageError::Backend(BackendError::PoolExhausted { waited_ms: 0 })
            }
            PoolError::Closed => StorageError::Backend(BackendError::PoolClosed),
            PoolError::Backend(e) => StorageError::Backend(BackendError::ConnectionFailed {
                message: e.to_string(),
            }),
            other => StorageError::Backend(BackendError::Internal {
                message: other.to_string(),
                source: None,
            }),
        }
    }
}
