//! Error types for modelstash

use std::fmt;
use thiserror::Error;

/// Size/format context attached to failed LLM downloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadContext {
    pub model_size: Option<String>,
    pub model_format: Option<String>,
}

impl DownloadContext {
    /// Whether this context carries any LLM-class detail
    pub fn is_empty(&self) -> bool {
        self.model_size.is_none() && self.model_format.is_none()
    }
}

impl fmt::Display for DownloadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        write!(
            f,
            " (size: {}, format: {})",
            self.model_size.as_deref().unwrap_or("None"),
            self.model_format.as_deref().unwrap_or("None")
        )
    }
}

/// Main error type for modelstash
#[derive(Error, Debug)]
pub enum StashError {
    /// A backend transfer failed; retried by the download driver
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// All download attempts failed
    #[error("Failed to download model '{model_name}'{context} after multiple retries")]
    ExhaustedRetries {
        model_name: String,
        context: DownloadContext,
        #[source]
        source: Box<StashError>,
    },

    /// Relative or missing local URI
    #[error("Invalid model URI: {0}")]
    InvalidUri(String),

    /// URI scheme with no registered backend
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// One or more files of an object-storage batch failed
    #[error("Failed to transfer {} file(s): {}", failed.len(), failed.join(", "))]
    PartialBatch {
        failed: Vec<String>,
        #[source]
        source: Box<StashError>,
    },

    /// Spec is inconsistent or incomplete
    #[error("Invalid model spec: {0}")]
    InvalidSpec(String),

    /// Model name contains forbidden characters
    #[error("Invalid model name: {0}")]
    InvalidModelName(String),

    /// Model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Model name already taken
    #[error("Model already registered: {0}")]
    AlreadyRegistered(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StashError {
    /// Whether another attempt could succeed.
    ///
    /// URI, scheme and spec errors are permanent and fail fast.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            StashError::InvalidUri(_)
                | StashError::UnsupportedScheme(_)
                | StashError::InvalidSpec(_)
                | StashError::InvalidModelName(_)
                | StashError::Config(_)
        )
    }
}

/// Result type for modelstash operations
pub type StashResult<T> = Result<T, StashError>;

impl From<serde_json::Error> for StashError {
    fn from(err: serde_json::Error) -> Self {
        StashError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for StashError {
    fn from(err: toml::de::Error) -> Self {
        StashError::Config(err.to_string())
    }
}
