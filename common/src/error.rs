use thiserror::Error;
use tokio::task::JoinError;

/// Coarse classification callers match on to decide on retry or backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ProviderUnavailable,
    NotInitialized,
    NotFound,
    InvalidEntry,
    Internal,
}

// Core internal errors
#[derive(Error, Debug)]
pub enum QnaError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Not initialized: {0}")]
    NotInitialized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Storage error: {0}")]
    Storage(#[source] object_store::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl QnaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProviderUnavailable(_)
            | Self::Reqwest(_)
            | Self::Storage(_)
            | Self::Io(_)
            | Self::Config(_) => ErrorKind::ProviderUnavailable,
            Self::NotInitialized(_) => ErrorKind::NotInitialized,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidEntry(_) => ErrorKind::InvalidEntry,
            Self::Serialization(_) | Self::Join(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<object_store::Error> for QnaError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => Self::NotFound(path),
            other => Self::Storage(other),
        }
    }
}
