//! Error types for the keybranch core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Branch(#[from] BranchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Branch engine errors
// ---------------------------------------------------------------------------

/// Errors from the branch fork / diff / merge engine.
///
/// Unresolved merge conflicts are *not* an error: they come back as a
/// [`MergeResult`](crate::models::MergeResult) with `success == false`.
#[derive(Debug, Error)]
pub enum BranchError {
    /// A branch, space, project or key lookup failed.
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: String,
        id: String,
    },

    /// The request is well-formed but not allowed; the caller can fix it.
    #[error("{0}")]
    Validation(String),

    /// Storage failure. The surrounding transaction has been rolled back.
    #[error("branch storage error: {0}")]
    Database(DatabaseError),
}

impl BranchError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }
}

impl From<DatabaseError> for BranchError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Database(other),
        }
    }
}

impl From<rusqlite::Error> for BranchError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::SqliteError(err))
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed {
        version: u32,
        detail: String,
    },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: String,
        id: String,
    },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = BranchError::validation("Cannot delete the default branch");
        assert_eq!(err.to_string(), "Cannot delete the default branch");

        let err = BranchError::not_found("branch", "b-1");
        assert_eq!(err.to_string(), "branch not found: b-1");

        let err = ConfigError::InvalidValue {
            field: "merge.batch_size".into(),
            detail: "must be > 0".into(),
        };
        assert!(err.to_string().contains("merge.batch_size"));
    }

    #[test]
    fn test_database_not_found_stays_not_found() {
        let db_err = DatabaseError::NotFound {
            entity: "branch".into(),
            id: "abc".into(),
        };
        let err: BranchError = db_err.into();
        assert!(matches!(err, BranchError::NotFound { ref entity, .. } if entity == "branch"));

        let err: BranchError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, BranchError::Database(_)));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = BranchError::validation("nope").into();
        assert!(matches!(core_err, CoreError::Branch(_)));

        let core_err: CoreError = ConfigError::FileNotFound("x.toml".into()).into();
        assert!(matches!(core_err, CoreError::Config(_)));
    }
}
