//! Core error types for worksession-core.
//!
//! Errors are split by concern. Only [`SessionError`] is ever returned from a
//! controller operation; persistence failures at restore, scheduling failures
//! and clock skew are recovered locally and logged.

use std::path::PathBuf;
use thiserror::Error;

use crate::session::SessionState;

/// Core error type for worksession-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Session state machine errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Snapshot persistence errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors reported to the caller of a [`SessionController`](crate::SessionController) operation.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The operation is not valid from the current state. Nothing was written.
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },

    /// A session must have a positive planned duration.
    #[error("planned duration must be greater than zero")]
    InvalidDuration,

    /// The snapshot for the transition could not be committed.
    /// The controller stays at its last committed state.
    #[error("failed to commit snapshot: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Snapshot store failures.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("snapshot io failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot database access failed: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("snapshot schema version {found} is not supported (expected {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },

    #[error("snapshot is inconsistent: {0}")]
    Inconsistent(String),

    /// Another writer replaced the snapshot since it was last read.
    #[error("snapshot was changed by another process")]
    Conflict,
}

/// Notification scheduling failures. Never fatal to a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("notification permission denied")]
    PermissionDenied,

    #[error("failed to schedule notification: {0}")]
    Failed(String),
}

/// The wall clock reported a time before the anchor it is measured from.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("clock moved backwards by {behind_ms}ms")]
pub struct ClockSkewError {
    pub behind_ms: u64,
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Could not resolve the data directory
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg) => {
                if code.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_operation_and_state() {
        let err = SessionError::InvalidTransition {
            operation: "resume",
            state: SessionState::Running,
        };
        assert_eq!(err.to_string(), "cannot resume while running");
    }

    #[test]
    fn persistence_failure_wraps_into_core_error() {
        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let session: SessionError = PersistenceError::from(decode).into();
        let core: CoreError = session.into();
        assert!(matches!(
            core,
            CoreError::Session(SessionError::Persistence(PersistenceError::Decode(_)))
        ));
    }

    #[test]
    fn locked_database_is_recognized() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            None,
        );
        assert!(matches!(DatabaseError::from(err), DatabaseError::Locked));
    }

    #[test]
    fn query_failure_wraps_into_core_error() {
        let core = CoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(core, CoreError::Database(DatabaseError::QueryFailed(_))));
    }
}
