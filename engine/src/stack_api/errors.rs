use thiserror::Error;

/// Errors returned by a [`StackApi`](super::StackApi) implementation.
///
/// Variants carry enough context to decide whether a call may be retried.
/// The HTTP client retries [`is_retryable`](StackApiError::is_retryable)
/// failures itself; whatever surfaces to the engine is final for that call.
///
/// # Error Categories
///
/// ## Client Configuration Errors
/// - [`ClientCreation`] - HTTP client initialization failures
/// - [`InvalidRequest`] - The work item cannot be expressed as a request
/// - [`Unsupported`] - The remote has no endpoint for this operation
///
/// ## Request Execution Errors
/// - [`RequestFailed`] - Network level failure
/// - [`Timeout`] - Request exceeded the client timeout
/// - [`Status`] - Non-success HTTP status
/// - [`InvalidResponse`] - Unexpected response body
///
/// ## Rate Limiting
/// - [`RateLimited`] - HTTP 429 with the advertised retry delay
///
/// [`ClientCreation`]: StackApiError::ClientCreation
/// [`InvalidRequest`]: StackApiError::InvalidRequest
/// [`Unsupported`]: StackApiError::Unsupported
/// [`RequestFailed`]: StackApiError::RequestFailed
/// [`Timeout`]: StackApiError::Timeout
/// [`Status`]: StackApiError::Status
/// [`InvalidResponse`]: StackApiError::InvalidResponse
/// [`RateLimited`]: StackApiError::RateLimited
#[derive(Debug, Error)]
pub enum StackApiError {
    #[error("HTTP client creation failed: {reason}")]
    ClientCreation { reason: String },

    #[error("Request failed: {url} - {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Request timeout after {seconds}s: {url}")]
    Timeout { url: String, seconds: u64 },

    #[error("Rate limit exceeded: retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("HTTP {status} from {url}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Invalid response: expected {expected}, got {actual}")]
    InvalidResponse { expected: String, actual: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),
}

impl StackApiError {
    /// Transient failures worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            StackApiError::RequestFailed { .. }
            | StackApiError::Timeout { .. }
            | StackApiError::RateLimited { .. } => true,
            StackApiError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
