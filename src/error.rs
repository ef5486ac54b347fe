#![forbid(unsafe_code)]

//! The error taxonomy used across the pipeline. Mirrors the failure kinds
//! by *meaning*, not by call site: a `ParseError` dropped inside the
//! timestamp parser and a `ParseError` surfaced from config loading are the
//! same variant, carrying different messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("platform quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("transient platform error: {0}")]
    Transient(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("catalog integrity error: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl AppError {
    /// Exit code this error kind maps to when it reaches `main` unhandled.
    /// `QuotaExceeded` is the only non-fatal non-zero exit: a run that hits
    /// quota still commits the partial merge for channels that completed.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 3,
            AppError::QuotaExceeded(_) => 2,
            AppError::Integrity(_) | AppError::Io(_) => 4,
            AppError::Transient(_) | AppError::NotFound(_) | AppError::Parse(_) => 1,
        }
    }

    /// `Transient` errors (and only these) are eligible for the retry
    /// policy in `platform_client`.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, AppError::QuotaExceeded(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Io(format!("JSON (de)serialization failed: {err}"))
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::Io(format!("CSV (de)serialization failed: {err}"))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
