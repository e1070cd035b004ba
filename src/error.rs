//! Error types for the qmap generation pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Storage-related errors (output sink, transcripts, reports)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Settings serialization failed: {0}")]
    SettingsSerialization(#[from] toml::ser::Error),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Dataset loading errors (schemas, samples, question files)
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset path not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid JSON in {path}: {message}")]
    InvalidJson { path: PathBuf, message: String },

    #[error("Dataset file is empty: {0}")]
    Empty(PathBuf),

    #[error("Database id(s) not found in schemas: {0}")]
    UnknownDbIds(String),

    #[error("Dataset I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Provider request failed: {0}")]
    ProviderRequestFailed(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuthFailed(String),

    #[error("Provider rate limit exceeded: {0}")]
    ProviderRateLimit(String),

    #[error("Provider model not found: {0}")]
    ProviderModelNotFound(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Dataset error: {0}")]
    DatasetError(#[from] DatasetError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Prompt error: {0}")]
    PromptError(String),

    #[error("Max fail limit reached ({limit} unexpected failures). Last error: {last_error}")]
    FailureLimitReached { limit: usize, last_error: String },
}

impl ApiError {
    /// True for errors raised by a generation provider (transport, auth, quota, model lookup).
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            ApiError::ProviderError(_)
                | ApiError::ProviderNotConfigured(_)
                | ApiError::ProviderRequestFailed(_)
                | ApiError::ProviderAuthFailed(_)
                | ApiError::ProviderRateLimit(_)
                | ApiError::ProviderModelNotFound(_)
        )
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
