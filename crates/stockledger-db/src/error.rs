//! # Database Error Types
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  sqlx::Error ──────────────┐        CoreError (ledger rule) ─┐         │
//! │                            ▼                                  ▼         │
//! │  DbError (this module) ◄── categorised ──────────── DbError::Domain     │
//! │       │                                                                 │
//! │       ├── WriteConflict ──► retry loop ──► another attempt              │
//! │       │                          │                                      │
//! │       │                          └─ limit hit ─► Domain(Concurrency-    │
//! │       │                                               Exhausted)        │
//! │       ▼                                                                 │
//! │  caller                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stockledger_core::CoreError;
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A document changed between read and write, or SQLite reported the
    /// database busy. Transient: the whole operation is retried.
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    /// A ledger rule rejected the operation.
    #[error(transparent)]
    Domain(#[from] CoreError),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A JSON column could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        DbError::WriteConflict(what.into())
    }

    /// Whether the failed attempt may simply be run again.
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, DbError::WriteConflict(_))
    }

    /// The ledger rule violation, if that is what this is.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            DbError::Domain(err) => Some(err),
            _ => None,
        }
    }
}

/// SQLite primary/extended result codes that mean "try again later":
/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and their extended variants.
const BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517", "773"];

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → busy/locked → WriteConflict
///                               constraint  → UniqueViolation / ForeignKeyViolation
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                let busy = db_err
                    .code()
                    .map(|code| BUSY_CODES.contains(&&*code))
                    .unwrap_or(false);

                let locked = msg.contains("database is locked")
                    || msg.contains("database table is locked");

                if busy || locked {
                    DbError::WriteConflict(msg.to_string())
                } else if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

impl From<stockledger_core::ValidationError> for DbError {
    fn from(err: stockledger_core::ValidationError) -> Self {
        DbError::Domain(CoreError::Validation(err))
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
