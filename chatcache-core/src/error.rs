use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Document store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error came from the cache layer rather than the
    /// authoritative store. Cache errors never fail a chat operation.
    #[must_use]
    pub const fn is_cache_error(&self) -> bool {
        matches!(self, Self::Cache(_) | Self::Redis(_) | Self::Serialization(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_classification() {
        assert!(Error::Cache("wrong type".to_string()).is_cache_error());
        assert!(!Error::NotFound("message".to_string()).is_cache_error());
        assert!(!Error::Store("timeout".to_string()).is_cache_error());
    }

    #[test]
    fn test_display() {
        let err = Error::NotFound("Message abc not found".to_string());
        assert_eq!(err.to_string(), "Not found: Message abc not found");
    }
}
