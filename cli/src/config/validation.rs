/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid page_size: {configured} (min: 1, max: {limit})")]
    PageSize { configured: u64, limit: u64 },
    #[error("Invalid batch_size: {configured} (min: 1, max: {limit})")]
    BatchSize { configured: usize, limit: usize },
    #[error("Invalid concurrency: {configured} (min: 1, max: {limit})")]
    Concurrency { configured: usize, limit: usize },
    #[error("Invalid min_batch_ms: {configured} (limit: {limit})")]
    MinBatchDuration { configured: u64, limit: u64 },
    #[error("Invalid requests_per_second: {configured} (min: 1, max: {limit})")]
    RequestsPerSecond { configured: u32, limit: u32 },
    #[error("Invalid timeout_secs: {configured} (min: 1, max: {limit})")]
    HttpTimeout { configured: u64, limit: u64 },
    #[error("Invalid max_retries: {configured} (limit: {limit})")]
    HttpRetries { configured: u32, limit: u32 },
    #[error("Invalid consumer: '{configured}' (expected 'bulk' or 'single')")]
    Consumer { configured: String },
}

impl ConfigValidationError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigValidationError::PageSize { configured, limit } => format!(
                "Page size out of range!\n\
                Your configured value: {configured}\n\
                Valid range: 1 - {limit}\n\
                Please update bulk.page_size in stackshift.toml or pass --page-size."
            ),
            ConfigValidationError::BatchSize { configured, limit } => format!(
                "Batch size out of range!\n\
                Your configured value: {configured}\n\
                Valid range: 1 - {limit}\n\
                Please update bulk.batch_size in stackshift.toml or pass --batch-size."
            ),
            ConfigValidationError::Concurrency { configured, limit } => format!(
                "Concurrency out of range!\n\
                Your configured value: {configured}\n\
                Valid range: 1 - {limit}\n\
                Please update bulk.concurrency in stackshift.toml or pass --concurrency."
            ),
            ConfigValidationError::MinBatchDuration { configured, limit } => format!(
                "Minimum batch duration too high!\n\
                Your configured value: {configured} ms\n\
                Recommended maximum: {limit} ms\n\
                Please update bulk.min_batch_ms in stackshift.toml or pass --min-batch-ms."
            ),
            ConfigValidationError::RequestsPerSecond { configured, limit } => format!(
                "Request rate out of range!\n\
                Your configured value: {configured} requests per second\n\
                Valid range: 1 - {limit}\n\
                Please update limits.requests_per_second in stackshift.toml."
            ),
            ConfigValidationError::HttpTimeout { configured, limit } => format!(
                "HTTP timeout out of range!\n\
                Your configured value: {configured} seconds\n\
                Valid range: 1 - {limit} seconds\n\
                Please update http.timeout_secs in stackshift.toml."
            ),
            ConfigValidationError::HttpRetries { configured, limit } => format!(
                "Too many HTTP retries!\n\
                Your configured value: {configured}\n\
                Recommended maximum: {limit}\n\
                Please update http.max_retries in stackshift.toml."
            ),
            ConfigValidationError::Consumer { configured } => format!(
                "Unknown consumer mode '{configured}'!\n\
                Use 'bulk' for one request per batch or 'single' for one request per item.\n\
                Please update bulk.consumer in stackshift.toml."
            ),
        }
    }
}

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "Configuration loading failed: {0}. Please check your stackshift.toml file and environment variables."
    )]
    Load(String),

    #[error("Failed to deserialize config: {0}")]
    Deserialize(String),

    #[error("Configuration validation failed:\n{}", join_messages(.0))]
    Invalid(Vec<ConfigValidationError>),
}

fn join_messages(errors: &[ConfigValidationError]) -> String {
    errors
        .iter()
        .map(ConfigValidationError::user_message)
        .collect::<Vec<_>>()
        .join("\n\n")
}
