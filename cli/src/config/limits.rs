//! Hard limits for run parameters accepted from configuration and flags.

/// Largest page the stack list endpoints return
pub const STACK_MAX_PAGE_SIZE: u64 = engine::context::MAX_PAGE_SIZE;

/// Maximum number of items in one dispatched batch
pub const MAX_BATCH_SIZE: usize = 100;

/// Maximum number of items in flight at once
pub const MAX_CONCURRENCY: usize = 50;

/// Maximum floor on the duration of one batch (one minute)
pub const MAX_MIN_BATCH_MS: u64 = 60_000;

/// Maximum request rate towards the stack API
pub const MAX_REQUESTS_PER_SECOND: u32 = 100;

/// Maximum reasonable HTTP timeout (10 minutes)
pub const MAX_HTTP_TIMEOUT_SECS: u64 = 600;

/// Maximum retries of a single transient failure
pub const MAX_HTTP_RETRIES: u32 = 10;
