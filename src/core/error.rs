use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabbookError {
    #[error("Failed to initialize store: {0}")]
    InitializationError(String),
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Store error: {0}")]
    StoreError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, LabbookError>;

impl LabbookError {
    /// Recoverable errors leave the session usable; only initialization is fatal.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LabbookError::InitializationError(_))
    }
}

/// True when SQLite rejected a write because of a UNIQUE or PRIMARY KEY clash.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => matches!(
            code.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        ),
        _ => false,
    }
}

/// True for any SQLite constraint failure (CHECK, NOT NULL, FOREIGN KEY, UNIQUE, trigger).
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            code.code == rusqlite::ErrorCode::ConstraintViolation
        }
        _ => false,
    }
}
