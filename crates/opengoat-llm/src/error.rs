use thiserror::Error;

/// Errors surfaced by a provider invocation.
///
/// These map to the provider-error kinds in the orchestrator's error
/// design: missing credentials, a missing CLI binary, a provider that
/// ran but produced nothing usable, and an action the provider doesn't
/// support.
#[derive(Debug, Error)]
pub enum Error {
    #[error("provider '{0}' has no usable credential: tried {1:?}")]
    Authentication(String, Vec<String>),

    #[error("provider command not found: {0}")]
    CommandNotFound(String),

    #[error("provider '{0}' returned no usable output")]
    Runtime(String),

    #[error("provider '{0}' does not support {1}")]
    UnsupportedAction(String, &'static str),

    #[error("provider invocation timed out after {0}s")]
    Timeout(u64),

    #[error("http transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
