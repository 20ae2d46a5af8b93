//! Error taxonomy for limiter decisions and storage.

use thiserror::Error;

/// Errors raised by the limiter record, storage backends and decision engine.
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// Malformed identifier; fatal to the single request
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Unknown storage backend tag in configuration
    #[error("Invalid backend type: {0}")]
    InvalidBackendType(String),

    /// Networked backend requested without a connection handle
    #[error("Networked backend requires a connection")]
    MissingConnection,

    /// Block cooldown that cannot be applied to the current time
    #[error("Invalid block duration: {0}")]
    InvalidBlockDuration(String),

    /// Encoding a record for storage failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored payload could not be decoded
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Transient backend failure, deadline expiry or unresolved write conflict
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl RateLimitError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RateLimitError::InvalidIdentifier(_) => "invalid_identifier",
            RateLimitError::InvalidBackendType(_) => "invalid_backend_type",
            RateLimitError::MissingConnection => "missing_connection",
            RateLimitError::InvalidBlockDuration(_) => "invalid_block_duration",
            RateLimitError::Serialization(_) => "serialization",
            RateLimitError::Deserialization(_) => "deserialization",
            RateLimitError::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        RateLimitError::StorageUnavailable(err.to_string())
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;
