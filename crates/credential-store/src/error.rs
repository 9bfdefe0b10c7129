//! Error types for credential storage

/// Errors from the durable user/token store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("username already taken: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("credential parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
