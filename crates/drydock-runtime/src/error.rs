//! Runtime adapter error types.

/// Errors from the container daemon layer.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Failure establishing a connection to the daemon.
    #[error("daemon connection: {0}")]
    Connection(#[source] anyhow::Error),

    /// A daemon API call failed.
    #[error("daemon api: {0}")]
    Api(#[source] anyhow::Error),
}

impl RuntimeError {
    pub fn api(err: impl Into<anyhow::Error>) -> Self {
        Self::Api(err.into())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RuntimeError>;
