//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::ApiError;

/// Rendered result of one command. `success == false` maps to a non-zero exit code
/// while still printing `text` (an aborted run still has a summary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub text: String,
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(text: String) -> Self {
        Self {
            text,
            success: true,
        }
    }

    pub fn failed(text: String) -> Self {
        Self {
            text,
            success: false,
        }
    }
}

/// Map domain/service errors to a string for CLI output.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::ProviderNotConfigured(_) | ApiError::ProviderAuthFailed(_) => {
            format!("{}\nCheck model.api_key or the provider's API key environment variable.", e)
        }
        ApiError::ConfigError(_) => {
            format!("{}\nRun 'qmap check-config' to see every configuration problem.", e)
        }
        e if e.is_provider_error() => {
            format!("{}\nRun 'qmap models' to check that the provider is reachable.", e)
        }
        _ => e.to_string(),
    }
}
