//! Application-level error types for the Coral redirect server.

use crate::qr::QrError;
use crate::storage::StorageError;
use thiserror::Error;

/// Top-level application error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("file error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Telemetry initialization errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("metrics initialization failed: {0}")]
    MetricsInit(String),

    #[error("logging setup failed: {0}")]
    Logging(String),
}

/// Outcome of a redirect operation that did not succeed.
///
/// Callers must be able to tell "pick another key" (`Conflict`) and
/// "fix the request" (`Validation`) apart from "retry later" (`Storage`).
#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Conflict(StorageError),

    #[error("storage failure: {0}")]
    Storage(StorageError),

    #[error("QR rendering failed: {0}")]
    Render(QrError),
}

impl From<StorageError> for RedirectError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::AlreadyExists(_) | StorageError::DoesNotExist(_) => Self::Conflict(err),
            StorageError::InvalidKey => Self::Validation(err.to_string()),
            other => Self::Storage(other),
        }
    }
}

impl From<QrError> for RedirectError {
    fn from(err: QrError) -> Self {
        match err {
            QrError::InvalidParam(msg) => Self::Validation(msg),
            other => Self::Render(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
