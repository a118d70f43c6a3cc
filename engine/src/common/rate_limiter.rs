use governor::{
    Quota, RateLimiter as GovernorRateLimiter,
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Request pacing for remote stack API calls.
///
/// This is the per-request limiter used by the HTTP client. The batch level
/// floor lives in [`RateGatedBatchExecutor`](crate::bulk_operations::RateGatedBatchExecutor);
/// both apply during a run.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
    requests_per_second: u32,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("requests_per_second", &self.requests_per_second)
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_second`, bursting up to the same amount.
    ///
    /// A value of zero is treated as one request per second.
    pub fn new(requests_per_second: u32) -> Self {
        RateLimiterConfig {
            requests_per_second,
            burst_size: None,
        }
        .build()
    }

    /// Non-blocking check; returns how long to wait when the quota is exhausted.
    pub fn check(&self) -> Result<(), RateLimitError> {
        self.inner.check().map_err(|not_until| {
            let retry_after = not_until.wait_time_from(DefaultClock::default().now());
            RateLimitError::TooManyRequests { retry_after }
        })
    }

    /// Wait until the next request may be sent.
    ///
    /// Returns at once while the quota lasts.
    pub async fn until_ready(&self) {
        if let Err(e) = self.check() {
            log::debug!("{e}");
            self.inner.until_ready().await;
        }
    }

    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second
    }
}

/// Rate limiting errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests { retry_after: Duration },
}

/// Rate limiter configuration, read from the `[limits]` section of the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum requests per second sent to the stack API
    pub requests_per_second: u32,
    /// Maximum burst size (defaults to requests_per_second)
    pub burst_size: Option<u32>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: None,
        }
    }
}

impl RateLimiterConfig {
    pub fn build(&self) -> RateLimiter {
        let rps = NonZeroU32::new(self.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = self
            .burst_size
            .and_then(NonZeroU32::new)
            .unwrap_or(rps);
        let quota = Quota::per_second(rps).allow_burst(burst);

        RateLimiter {
            inner: Arc::new(GovernorRateLimiter::direct(quota)),
            requests_per_second: rps.get(),
        }
    }
}
