//! Error type shared by the domain modules.
//!
//! Commands convert these into plain strings at the IPC boundary, so the
//! `Display` output is what the UI ends up showing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClinicError {
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database lock poisoned: {0}")]
    Lock(String),
}

impl ClinicError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

impl<T> From<std::sync::PoisonError<T>> for ClinicError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}

impl From<ClinicError> for String {
    fn from(e: ClinicError) -> Self {
        e.to_string()
    }
}

pub type ClinicResult<T> = Result<T, ClinicError>;
