//! Error types for the slot relay.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("State error: {0}")]
    State(#[from] StateError),
}

/// Configuration-related errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load env file {path}: {reason}")]
    EnvFile { path: PathBuf, reason: String },
}

/// Failures resolving the source group on the messaging platform.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Source group {name} not found: {reason}")]
    GroupNotFound { name: String, reason: String },

    #[error("Lookup of {name} failed: {reason}")]
    LookupFailed { name: String, reason: String },
}

/// Watermark persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Malformed state file {path} at line {line}: {content:?}")]
    Malformed {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("Failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors fetching new messages from the source group.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API returned an error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors from the client's send operation.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Send failed: {0}")]
    Failed(String),
}

/// Errors surfaced by the forwarder for a single message.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ForwardError {
    /// The platform asked us to wait before the next send.
    #[error("Rate limited, must wait {wait:?}")]
    RateLimited { wait: Duration },

    #[error("Transient send failure: {0}")]
    Transient(String),
}

impl From<SendError> for ForwardError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::RateLimited { retry_after } => Self::RateLimited { wait: retry_after },
            SendError::Failed(reason) => Self::Transient(reason),
        }
    }
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
