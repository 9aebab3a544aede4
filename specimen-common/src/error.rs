//! Common error types for specimen tracking

use thiserror::Error;

/// Common result type for specimen operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the store, the sequencer, the file lifecycle and
/// the sweepers
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A lookup by external id or natural key matched nothing
    #[error("The {kind} \"{key}\" could not be found")]
    NotFound { kind: &'static str, key: String },

    /// The caller's view of the world is stale (e.g. a stage continuation
    /// token that no longer names the last stage)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A unique natural key (project name, file path, ...) is already taken
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Uploaded bytes do not hash to the checksum the client sent
    #[error("Checksum mismatch for {path} using method {method}; received={received}, computed={computed}")]
    ChecksumMismatch {
        path: String,
        method: String,
        received: String,
        computed: String,
    },

    /// The client asked for a digest we do not implement
    #[error("The checksum method \"{0}\" is not supported; use one of: sha256")]
    UnsupportedChecksum(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`]
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Protocol-level status the request layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Conflict(_) | Error::Integrity(_) => 409,
            Error::ChecksumMismatch { .. } | Error::UnsupportedChecksum(_) => 422,
            Error::InvalidInput(_) => 400,
            Error::Database(_) | Error::Io(_) | Error::Config(_) | Error::Internal(_) => 500,
        }
    }

    /// Convert a unique-constraint failure into [`Error::Integrity`]; any
    /// other database error passes through untouched.
    pub fn from_insert(err: sqlx::Error, what: impl FnOnce() -> String) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::Integrity(what())
            }
            _ => Error::Database(err),
        }
    }
}
