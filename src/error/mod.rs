//! Error types for the dispensary backend.

use thiserror::Error;

/// Primary error type for all dispensary operations.
#[derive(Error, Debug)]
pub enum DispensaryError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl DispensaryError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from talking to a model provider.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Self::Api { .. }
                | Self::Network(_)
                | Self::Authentication(_)
                | Self::RateLimited { .. }
                | Self::Stream(_)
                | Self::Provider { .. }
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, DispensaryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display_includes_status() {
        let err = DispensaryError::api(503, "overloaded");
        assert_eq!(err.to_string(), "API error (status 503): overloaded");
        assert!(err.is_provider_failure());
    }

    #[test]
    fn store_errors_are_not_provider_failures() {
        let err = DispensaryError::Store("connection refused".into());
        assert!(!err.is_provider_failure());
        assert_eq!(err.to_string(), "Store error: connection refused");
    }
}
