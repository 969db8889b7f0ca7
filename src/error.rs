use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while talking to a remote content store
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Content not found: {path}")]
    NotFound { path: String },

    #[error("Path is a directory or non-file entry, not a file: {path}")]
    NotAFile { path: String },

    #[error("File {path} is {size} bytes, above the {limit} byte retrieval limit")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error(
        "Conflict writing {path}: the file changed since the sha you supplied ({message}). \
         Re-fetch the current content and retry with its sha"
    )]
    Conflict { path: String, message: String },

    #[error("Rate limited by remote service: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    #[error("Remote error {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid remote structure: {message}")]
    InvalidStructure { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`BridgeError`], independent of any status-code scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    NotAFile,
    TooLarge,
    Conflict,
    RateLimited,
    Unauthorized,
    Timeout,
    RemoteError,
    InvalidRequest,
    Transport,
    Internal,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::NotFound { .. } => ErrorKind::NotFound,
            BridgeError::NotAFile { .. } => ErrorKind::NotAFile,
            BridgeError::TooLarge { .. } => ErrorKind::TooLarge,
            BridgeError::Conflict { .. } => ErrorKind::Conflict,
            BridgeError::RateLimited { .. } => ErrorKind::RateLimited,
            BridgeError::Unauthorized { .. } => ErrorKind::Unauthorized,
            BridgeError::Timeout { .. } => ErrorKind::Timeout,
            BridgeError::Remote { .. } => ErrorKind::RemoteError,
            BridgeError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            BridgeError::Network(_) => ErrorKind::Transport,
            BridgeError::InvalidStructure { .. }
            | BridgeError::InvalidConfig { .. }
            | BridgeError::Serialization(_)
            | BridgeError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Only throttling is safe to retry without re-reading remote state
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::RateLimited { .. })
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        BridgeError::InvalidRequest {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_structure(message: impl Into<String>) -> Self {
        BridgeError::InvalidStructure {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            let operation = err
                .url()
                .map(|u| format!("request to {}", u.path()))
                .unwrap_or_else(|| "remote request".to_string());
            BridgeError::Timeout { operation }
        } else if err.is_decode() {
            BridgeError::InvalidStructure {
                message: err.to_string(),
            }
        } else {
            BridgeError::Network(err)
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
