use crate::config::ConfigError;
use engine::common::EngineError;
use engine::stack_api::StackApiError;
use engine::utils::EnvVarError;
use thiserror::Error;

/// Exit code of a run that completed without failures.
pub const EXIT_OK: u8 = 0;
/// Exit code of a run that logged failed items, or aborted.
pub const EXIT_FAILURES: u8 = 1;
/// Exit code when the run never started because of its configuration.
pub const EXIT_CONFIG: u8 = 2;
/// Exit code of a run stopped by Ctrl+C.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Errors that end the command before or outside a run.
///
/// Failures of individual items never surface here; they go to the run's
/// error log.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("Credentials Error: {0}")]
    Credentials(#[from] EnvVarError),

    #[error("Engine Error: {0}")]
    Engine(#[from] EngineError),

    #[error("Stack API Error: {0}")]
    Api(#[from] StackApiError),

    #[error("I/O Error while {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Logger Error: {0}")]
    Logger(#[from] log::SetLoggerError),
}

impl AppError {
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) | AppError::ConfigFile(_) | AppError::Credentials(_) => EXIT_CONFIG,
            AppError::Engine(EngineError::FatalConfig(_)) => EXIT_CONFIG,
            AppError::Engine(EngineError::Interrupted) => EXIT_INTERRUPTED,
            _ => EXIT_FAILURES,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
