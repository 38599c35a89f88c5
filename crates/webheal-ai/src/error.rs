//! Error types for step generation

use thiserror::Error;

/// Step-generation error types
#[derive(Error, Debug)]
pub enum AiError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("{provider} HTTP {status}: {message}")]
    LlmHttp {
        provider: String,
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Invalid response format: {0}")]
    InvalidFormat(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Unknown workflow type: {0}")]
    UnknownWorkflow(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LlmHttp { status, .. } => *status == 429 || *status >= 500,
            Self::Llm(message) => {
                let lower = message.to_lowercase();
                lower.contains("rate limit")
                    || lower.contains("overloaded")
                    || lower.contains("timeout")
            }
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::LlmHttp {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Result type alias for step-generation operations
pub type Result<T> = std::result::Result<T, AiError>;
