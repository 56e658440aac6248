//! Error types for the cache engine.

use std::sync::Arc;

use thiserror::Error;

/// Result type for facade operations that can surface an error.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced to callers of the cache facade.
///
/// Remote tier, channel and payload failures never reach this type; they
/// are logged and degrade to a miss or a no-op.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The `wrap` factory failed. Shared by every caller waiting on the same key.
    #[error("cache population failed: {0}")]
    Factory(Arc<anyhow::Error>),

    /// A value could not be converted to or from its JSON form.
    #[error("cache value serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Access the underlying factory error, if this is a factory failure.
    pub fn factory_error(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::Factory(e) => Some(&**e),
            _ => None,
        }
    }
}

/// Errors returned by a [`RemoteTier`](crate::remote::RemoteTier) implementation.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("remote pool error: {0}")]
    Pool(String),

    #[error("remote connection error: {0}")]
    Connection(String),

    #[error("remote command `{op}` failed: {message}")]
    Command { op: &'static str, message: String },

    #[error("remote subscribe error: {0}")]
    Subscribe(String),
}

impl RemoteError {
    pub fn command(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Command {
            op,
            message: err.to_string(),
        }
    }
}
