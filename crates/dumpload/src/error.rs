// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use storage::StorageError;
use thiserror::Error;

/// Coarse classification used by callers to decide what to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Detected before any remote call; fix the invocation
    Configuration,
    /// The grant does not permit the operation, or has expired
    Authorization,
    /// Manifest absent or incomplete, or a promised object missing
    NotFound,
    /// Retries exhausted on a network or service failure
    Transient,
    Fatal,
    Cancelled,
}

/// Failure reported by the SQL execution layer
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SqlError {
    pub message: String,
}

impl SqlError {
    pub fn new<M: Into<String>>(message: M) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Configuration(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Not Found: no dump manifest at {location}")]
    DumpNotFound { location: String },

    #[error("Not Found: the dump at {location} is incomplete, its completion marker is missing")]
    IncompleteDump { location: String },

    #[error("Not Found: object {key} promised by the completion marker is missing")]
    MissingObject { key: String },

    /// A declared grant lacks an operation the invocation needs
    #[error("{message}")]
    AccessDenied {
        operation: &'static str,
        message: String,
    },

    #[error("Access grant for {location} expired at {expired_at}")]
    GrantExpired {
        location: String,
        expired_at: String,
    },

    #[error("A dump already exists at {location}")]
    DumpExists { location: String },

    #[error("Progress file {path} does not exist, cannot resume the load")]
    ProgressFileMissing { path: String },

    #[error(
        "Progress file {path} belongs to dump {found}, not {expected}; reset progress to start over"
    )]
    ProgressMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Progress file {path} is corrupt at line {line}: {reason}")]
    CorruptProgress {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Invalid dump object {key}: {reason}")]
    InvalidObject { key: String, reason: String },

    #[error("SQL error on {target}: {source}")]
    Sql { target: String, source: SqlError },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Configuration(_)
            | Error::DumpExists { .. }
            | Error::ProgressFileMissing { .. }
            | Error::ProgressMismatch { .. } => ErrorClass::Configuration,
            Error::Storage(err) => {
                if err.is_not_found() {
                    ErrorClass::NotFound
                } else if err.is_authorization() {
                    ErrorClass::Authorization
                } else if err.is_transient() {
                    ErrorClass::Transient
                } else if matches!(err, StorageError::InvalidLocation(_)) {
                    ErrorClass::Configuration
                } else {
                    ErrorClass::Fatal
                }
            }
            Error::DumpNotFound { .. } | Error::IncompleteDump { .. } | Error::MissingObject { .. } => {
                ErrorClass::NotFound
            }
            Error::AccessDenied { .. } | Error::GrantExpired { .. } => ErrorClass::Authorization,
            Error::Cancelled => ErrorClass::Cancelled,
            Error::CorruptProgress { .. }
            | Error::InvalidObject { .. }
            | Error::Sql { .. }
            | Error::Io(_)
            | Error::Json(_) => ErrorClass::Fatal,
        }
    }

    pub(crate) fn sql<T: fmt::Display>(target: T) -> impl FnOnce(SqlError) -> Error {
        move |source| Error::Sql {
            target: target.to_string(),
            source,
        }
    }

    pub(crate) fn invalid_object<R: Into<String>>(key: &str, reason: R) -> Error {
        Error::InvalidObject {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level operations, the namespace of every surfaced message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    LoadDump,
    DumpSchemas,
    DumpInstance,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::LoadDump => "load_dump",
            Operation::DumpSchemas => "dump_schemas",
            Operation::DumpInstance => "dump_instance",
        })
    }
}

/// An [`Error`] namespaced by the operation that raised it
#[derive(Debug, Error)]
#[error("{operation}: {error}")]
pub struct OperationError {
    pub operation: Operation,
    pub error: Error,
}

impl OperationError {
    pub fn new(operation: Operation, error: Error) -> Self {
        Self { operation, error }
    }

    pub fn class(&self) -> ErrorClass {
        self.error.class()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_prefix() {
        let err = OperationError::new(
            Operation::LoadDump,
            Error::Configuration(
                "When using a PAR to load a dump, the progressFile option must be defined"
                    .to_string(),
            ),
        );
        assert_eq!(
            err.to_string(),
            "load_dump: When using a PAR to load a dump, the progressFile option must be defined"
        );
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn test_storage_classes() {
        let not_found: Error = StorageError::not_found("@.json").into();
        assert_eq!(not_found.class(), ErrorClass::NotFound);
        assert_eq!(not_found.to_string(), "Not Found");

        let expired: Error = StorageError::from_status("get", "k", 401, None).into();
        assert_eq!(expired.class(), ErrorClass::Authorization);

        let throttled: Error = StorageError::from_status("get", "k", 429, None).into();
        assert_eq!(throttled.class(), ErrorClass::Transient);
    }

    #[test]
    fn test_sql_error_names_target() {
        let err = Error::sql("world.city")(SqlError::new("duplicate key"));
        assert_eq!(err.to_string(), "SQL error on world.city: duplicate key");
        assert_eq!(err.class(), ErrorClass::Fatal);
    }
}
