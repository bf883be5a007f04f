//! Common error types for KSDB

use thiserror::Error;

use crate::ultrastar::ParseError;

/// Common result type for KSDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the persistence layer and the server
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure
    #[error("Migration error: {0}")]
    Migration(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource is in a state that does not permit the operation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// UltraStar TXT could not be parsed
    #[error("Invalid UltraStar file: {0}")]
    Txt(#[from] ParseError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
