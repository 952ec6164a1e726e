// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for storage access

use thiserror::Error;

/// Failure of a single storage operation
///
/// Messages carry object keys and redacted locations, never a raw
/// pre-authenticated request URL.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The object, prefix or bucket is absent, or invisible to this grant
    #[error("{message}")]
    NotFound { key: String, message: String },

    #[error("Forbidden: {message}")]
    Forbidden { key: String, message: String },

    /// 401: the grant was rejected as expired or revoked
    #[error("Access expired or revoked: {message}")]
    Expired { message: String },

    /// Eligible for retry: timeouts, throttling, server errors
    #[error("Transient failure during {operation}: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    #[error("HTTP {status} during {operation}: {message}")]
    Http {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),

    #[error("Invalid listing response: {0}")]
    InvalidResponse(String),

    #[error("Object store error: {0}")]
    ObjectStore(object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn not_found<K: Into<String>>(key: K) -> Self {
        StorageError::NotFound {
            key: key.into(),
            message: "Not Found".to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Authorization failures are terminal and never retried
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            StorageError::Forbidden { .. } | StorageError::Expired { .. }
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient { .. })
    }

    /// Map an HTTP status onto the error taxonomy
    ///
    /// `message` is the service-provided message when there is one; the
    /// canonical reason phrase is used otherwise.
    pub fn from_status(
        operation: &'static str,
        key: &str,
        status: u16,
        message: Option<String>,
    ) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown status")
            .to_string();
        let message = message.filter(|m| !m.is_empty()).unwrap_or(reason);
        match status {
            404 => StorageError::NotFound {
                key: key.to_string(),
                message,
            },
            403 => StorageError::Forbidden {
                key: key.to_string(),
                message,
            },
            401 => StorageError::Expired { message },
            408 | 429 | 500..=599 => StorageError::Transient { operation, message },
            _ => StorageError::Http {
                operation,
                status,
                message,
            },
        }
    }

    /// Convert a transport error, dropping the request URL it embeds
    ///
    /// Only failures to connect, timeouts and interrupted bodies are worth
    /// retrying; a request that cannot be built or sent fails the same way
    /// every time.
    pub fn from_transport(operation: &'static str, err: reqwest::Error) -> Self {
        let transient = err.is_connect() || err.is_timeout() || err.is_body();
        let message = err.without_url().to_string();
        if transient {
            StorageError::Transient { operation, message }
        } else {
            StorageError::Http {
                operation,
                status: 0,
                message,
            }
        }
    }
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::not_found(path),
            other => StorageError::ObjectStore(other),
        }
    }
}
