//! Storage error types.

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested item (e.g. an import source) was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A storage operation failed.
    #[error("storage error: {0}")]
    Internal(String),

    /// Connection to the storage backend failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The key is invalid (empty after normalization or contains a null byte).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// An import document is malformed. Nothing was written.
    #[error("invalid import: {0}")]
    InvalidImport(String),

    /// The caller asked for the current user but nobody is authenticated.
    #[error("no authenticated user found")]
    MissingIdentity,

    /// A value or TTL is outside the range the operation can represent.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
