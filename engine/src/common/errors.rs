use crate::stack_api::StackApiError;
use thiserror::Error;

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the bulk operation engine.
///
/// The taxonomy mirrors how each failure is allowed to propagate. Per-item
/// failures never abort a batch or a scan: they are captured as failed
/// [`ItemResult`](crate::model::ItemResult)s and written to the error log.
/// Only [`FatalConfig`] and an unrecoverable [`PageFetch`] abort a run.
///
/// # Error Categories
///
/// ## Remote Errors
/// - [`Transport`] - A single remote call failed after the client exhausted its retries
/// - [`RateLimited`] - The remote kept answering 429 after the client backed off
/// - [`PageFetch`] - Listing a page failed; the scan stops
///
/// ## Local State Errors
/// - [`MalformedState`] - A resume snapshot or log line could not be understood
/// - [`Io`] - Checkpoint or log file system failures
///
/// ## Run Control
/// - [`FatalConfig`] - Missing or invalid run parameters, raised before any remote call
/// - [`Interrupted`] - Shutdown was requested while work was being admitted
///
/// # Examples
///
/// ```no_run
/// use engine::common::EngineError;
///
/// fn exit_code(error: &EngineError) -> i32 {
///     match error {
///         EngineError::FatalConfig(_) => 2,
///         EngineError::Interrupted => 130,
///         _ => 1,
///     }
/// }
/// ```
///
/// [`Transport`]: EngineError::Transport
/// [`RateLimited`]: EngineError::RateLimited
/// [`PageFetch`]: EngineError::PageFetch
/// [`MalformedState`]: EngineError::MalformedState
/// [`Io`]: EngineError::Io
/// [`FatalConfig`]: EngineError::FatalConfig
/// [`Interrupted`]: EngineError::Interrupted
#[derive(Debug, Error)]
pub enum EngineError {
    /// A remote call failed at the network or HTTP level.
    ///
    /// Retries with backoff have already been performed by the client layer
    /// when this surfaces.
    #[error("Transport error: {0}")]
    Transport(StackApiError),

    /// The remote rate limit was still in effect after the client backed off.
    #[error("Rate limited by remote: retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    /// Listing a page of a remote collection failed.
    ///
    /// # Fields
    /// - `scope`: The scan scope (for example `entries/blog_post`)
    /// - `skip`: Offset of the page that could not be fetched
    /// - `reason`: Description of the underlying failure
    #[error("Failed to fetch page at skip {skip} for {scope}: {reason}")]
    PageFetch {
        scope: String,
        skip: u64,
        reason: String,
    },

    /// Persisted state could not be parsed or is inconsistent.
    ///
    /// # Fields
    /// - `origin`: Where the state came from (file path, line number, snapshot name)
    /// - `reason`: What was wrong with it
    #[error("Malformed state in {origin}: {reason}")]
    MalformedState { origin: String, reason: String },

    /// Required run parameters are missing or invalid.
    #[error("Configuration error: {0}")]
    FatalConfig(String),

    /// Shutdown was requested before the operation could be admitted.
    #[error("Operation interrupted by shutdown request")]
    Interrupted,

    /// Local file system failure.
    #[error("I/O error while {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn malformed(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::MalformedState {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Whether this error must abort the whole run rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::FatalConfig(_) | EngineError::PageFetch { .. }
        )
    }
}

impl From<StackApiError> for EngineError {
    fn from(error: StackApiError) -> Self {
        match error {
            StackApiError::RateLimited {
                retry_after_seconds,
            } => EngineError::RateLimited {
                retry_after_seconds,
            },
            other => EngineError::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_api_error_maps_to_rate_limited() {
        let err: EngineError = StackApiError::RateLimited {
            retry_after_seconds: 7,
        }
        .into();
        assert!(matches!(
            err,
            EngineError::RateLimited {
                retry_after_seconds: 7
            }
        ));
    }

    #[test]
    fn test_other_api_errors_map_to_transport() {
        let err: EngineError = StackApiError::Timeout {
            url: "https://example.test/v3/assets".to_string(),
            seconds: 30,
        }
        .into();
        assert!(matches!(err, EngineError::Transport(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::FatalConfig("missing api key".into()).is_fatal());
        assert!(
            EngineError::PageFetch {
                scope: "assets".into(),
                skip: 100,
                reason: "connection reset".into(),
            }
            .is_fatal()
        );
        assert!(!EngineError::malformed("cursor.json", "no total").is_fatal());
    }
}
