//! Error types for the Kaputa domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; every one of them is scoped
//! to a single turn or a single upload and never fatal to the process.

use thiserror::Error;

/// The top-level error type for all Kaputa operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Turn processing ---
    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    // --- Model client ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Upload processing ---
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of a single chat turn.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// The submitted input was blank. Nothing was sent upstream.
    #[error("Input is empty")]
    EmptyInput,

    /// The message store rejected a turn.
    #[error("Invalid turn: {0}")]
    Validation(String),

    /// The model call failed or produced unusable output.
    #[error("Upstream failure: {0}")]
    Upstream(#[from] ProviderError),
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures while turning an uploaded artifact into text.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("Unreadable document {name}: {reason}")]
    Unreadable { name: String, reason: String },

    #[error("Unsupported document type: {0}")]
    Unsupported(String),

    #[error("Document {0} contains no text")]
    Empty(String),

    #[error("Transcript unavailable for {media_id}: {reason}")]
    TranscriptUnavailable { media_id: String, reason: String },
}

/// Failures of a web search call. Always degraded to "no context" by callers.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Request(String),

    #[error("Search backend returned status {0}")]
    Status(u16),

    #[error("Search response could not be parsed: {0}")]
    Parse(String),

    #[error("Search not configured: {0}")]
    NotConfigured(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn upstream_chat_error_wraps_provider_error() {
        let err: ChatError = ProviderError::Timeout("30s".into()).into();
        assert!(matches!(err, ChatError::Upstream(ProviderError::Timeout(_))));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn extraction_error_names_artifact() {
        let err = Error::Extraction(ExtractionError::Unreadable {
            name: "notes.pdf".into(),
            reason: "encrypted".into(),
        });
        assert!(err.to_string().contains("notes.pdf"));
        assert!(err.to_string().contains("encrypted"));
    }
}
