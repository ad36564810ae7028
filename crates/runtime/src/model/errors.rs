use thiserror::Error;

/// Errors from model client calls.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ModelError {
    /// A network error occurred during the API call.
    #[error("network: {0}")]
    Network(String),

    /// The provider answered with a non-success status.
    #[error("provider api ({status}): {body}")]
    Api { status: u16, body: String },

    /// The provider response could not be parsed.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// The client has no more responses to give (scripted clients).
    #[error("model client exhausted: {0}")]
    Exhausted(String),
}

impl ModelError {
    /// Transport failures, rate limits and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Network(_) => true,
            ModelError::Api { status, .. } => *status == 429 || *status == 529 || *status >= 500,
            ModelError::InvalidResponse(_) | ModelError::Exhausted(_) => false,
        }
    }
}
