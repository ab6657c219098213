//! Cache error types.

/// Cache operation errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Error from the Redis client
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Stored value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
