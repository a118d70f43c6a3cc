use super::{LoggingConfig, limits::*, validation::ConfigValidationError};
use crate::cli::GlobalArgs;
use crate::error::{AppError, AppResult};
use engine::common::RateLimiterConfig;
use engine::context::{ConsumerMode, DEFAULT_BATCH_SIZE, DEFAULT_PAGE_SIZE, RunContext, StackTarget};
use engine::stack_api::RetryPolicy;
use engine::utils::EnvUtils;
use engine::utils::env::{API_KEY_VAR, BRANCH_VAR, MANAGEMENT_TOKEN_VAR};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default management API host.
pub const DEFAULT_BASE_URL: &str = "https://api.contentstack.io";

/// Main application configuration
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    stack: StackConfig,
    #[serde(default)]
    bulk: BulkConfig,
    #[serde(default)]
    http: HttpConfig,
    #[serde(default)]
    limits: RateLimiterConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

/// `[stack]` section. Credentials are never read from here.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StackConfig {
    base_url: Option<String>,
    branch: Option<String>,
}

impl StackConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }
}

/// `[bulk]` section: engine limits and where run logs go.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BulkConfig {
    concurrency: Option<usize>,
    batch_size: Option<usize>,
    page_size: Option<u64>,
    min_batch_ms: Option<u64>,
    consumer: Option<String>,
    log_dir: Option<PathBuf>,
}

impl BulkConfig {
    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    /// Defaults to the batch size.
    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or_else(|| self.batch_size())
    }

    pub fn page_size(&self) -> u64 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn min_batch_duration(&self) -> Duration {
        Duration::from_millis(self.min_batch_ms.unwrap_or(1000))
    }

    pub fn consumer(&self) -> &str {
        self.consumer.as_deref().unwrap_or("bulk")
    }

    /// Configured log directory, else `<data dir>/stackshift/logs`, else `./logs`.
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|dir| dir.join("stackshift").join("logs"))
                .unwrap_or_else(|| PathBuf::from("logs"))
        })
    }
}

/// `[http]` section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct HttpConfig {
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(30))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::default();
        if let Some(max_retries) = self.max_retries {
            policy.max_retries = max_retries;
        }
        policy
    }
}

impl AppConfig {
    /// Let command line flags take precedence over file and environment values.
    pub fn apply_overrides(&mut self, args: &GlobalArgs) {
        if let Some(concurrency) = args.concurrency {
            self.bulk.concurrency = Some(concurrency);
        }
        if let Some(batch_size) = args.batch_size {
            self.bulk.batch_size = Some(batch_size);
        }
        if let Some(page_size) = args.page_size {
            self.bulk.page_size = Some(page_size);
        }
        if let Some(min_batch_ms) = args.min_batch_ms {
            self.bulk.min_batch_ms = Some(min_batch_ms);
        }
        if let Some(log_dir) = &args.log_dir {
            self.bulk.log_dir = Some(log_dir.clone());
        }
    }

    /// Validate the configuration against defined limits
    pub fn validate(&self) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        let page_size = self.bulk.page_size();
        if !(1..=STACK_MAX_PAGE_SIZE).contains(&page_size) {
            errors.push(ConfigValidationError::PageSize {
                configured: page_size,
                limit: STACK_MAX_PAGE_SIZE,
            });
        }

        let batch_size = self.bulk.batch_size();
        if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
            errors.push(ConfigValidationError::BatchSize {
                configured: batch_size,
                limit: MAX_BATCH_SIZE,
            });
        }

        let concurrency = self.bulk.concurrency();
        if !(1..=MAX_CONCURRENCY).contains(&concurrency) {
            errors.push(ConfigValidationError::Concurrency {
                configured: concurrency,
                limit: MAX_CONCURRENCY,
            });
        }

        let min_batch_ms = self.bulk.min_batch_duration().as_millis() as u64;
        if min_batch_ms > MAX_MIN_BATCH_MS {
            errors.push(ConfigValidationError::MinBatchDuration {
                configured: min_batch_ms,
                limit: MAX_MIN_BATCH_MS,
            });
        }

        if self.bulk.consumer().parse::<ConsumerMode>().is_err() {
            errors.push(ConfigValidationError::Consumer {
                configured: self.bulk.consumer().to_string(),
            });
        }

        let rps = self.limits.requests_per_second;
        if !(1..=MAX_REQUESTS_PER_SECOND).contains(&rps) {
            errors.push(ConfigValidationError::RequestsPerSecond {
                configured: rps,
                limit: MAX_REQUESTS_PER_SECOND,
            });
        }

        let timeout = self.http.timeout().as_secs();
        if !(1..=MAX_HTTP_TIMEOUT_SECS).contains(&timeout) {
            errors.push(ConfigValidationError::HttpTimeout {
                configured: timeout,
                limit: MAX_HTTP_TIMEOUT_SECS,
            });
        }

        let retries = self.http.retry_policy().max_retries;
        if retries > MAX_HTTP_RETRIES {
            errors.push(ConfigValidationError::HttpRetries {
                configured: retries,
                limit: MAX_HTTP_RETRIES,
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Build the context of one run of `task`.
    ///
    /// Credentials come from `STACKSHIFT_API_KEY` and
    /// `STACKSHIFT_MANAGEMENT_TOKEN`; the branch from `[stack] branch` or
    /// `STACKSHIFT_BRANCH`.
    pub fn run_context(&self, task: &str) -> AppResult<RunContext> {
        let api_key = EnvUtils::get_validated_var(API_KEY_VAR)?;
        let management_token = EnvUtils::get_validated_var(MANAGEMENT_TOKEN_VAR)?;
        let branch = self
            .stack
            .branch()
            .map(str::to_string)
            .or_else(|| EnvUtils::get_optional_var(BRANCH_VAR));

        let consumer_mode = self
            .bulk
            .consumer()
            .parse::<ConsumerMode>()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let ctx = RunContext::new(
            task,
            StackTarget::new(self.stack.base_url(), api_key, management_token, branch),
            self.bulk.log_dir(),
        )
        .with_consumer_mode(consumer_mode)
        .with_concurrency(self.bulk.concurrency())
        .with_batch_size(self.bulk.batch_size())
        .with_page_size(self.bulk.page_size())
        .with_min_batch_duration(self.bulk.min_batch_duration());

        ctx.validate()?;
        Ok(ctx)
    }

    // Configuration section accessors
    pub fn stack(&self) -> &StackConfig {
        &self.stack
    }

    pub fn bulk(&self) -> &BulkConfig {
        &self.bulk
    }

    pub fn http(&self) -> &HttpConfig {
        &self.http
    }

    pub fn limits(&self) -> &RateLimiterConfig {
        &self.limits
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }
}
