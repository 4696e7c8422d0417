//! Error types for the cluster crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] chatcache_core::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, Error>;
