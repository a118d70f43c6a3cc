pub mod errors;
pub mod rate_limiter;

pub use errors::{EngineError, EngineResult};
pub use rate_limiter::{RateLimitError, RateLimiter, RateLimiterConfig};
