//! Validated access to environment variables.
//!
//! Stack credentials are never read from configuration files; they come from
//! the process environment (or a `.env` file loaded by the CLI) through
//! [`EnvUtils`].

use thiserror::Error;

/// Stack API key.
pub const API_KEY_VAR: &str = "STACKSHIFT_API_KEY";
/// Management token sent in the `authorization` header.
pub const MANAGEMENT_TOKEN_VAR: &str = "STACKSHIFT_MANAGEMENT_TOKEN";
/// Optional branch override.
pub const BRANCH_VAR: &str = "STACKSHIFT_BRANCH";

/// Errors that can occur when reading an environment variable.
#[derive(Debug, Error)]
pub enum EnvVarError {
    #[error(
        "Environment variable '{name}' not found. Please set this variable in your .env file or environment."
    )]
    NotFound { name: String },

    #[error(
        "Environment variable '{name}' contains invalid UTF-8 characters. Please check the value."
    )]
    InvalidUtf8 { name: String },

    #[error("Environment variable '{name}' is empty. Please provide a valid value.")]
    Empty { name: String },
}

/// Helpers that trim values and treat blank variables as missing.
pub struct EnvUtils;

impl EnvUtils {
    pub fn has_non_empty_var(name: &str) -> bool {
        match std::env::var(name) {
            Ok(value) => !value.trim().is_empty(),
            Err(_) => false,
        }
    }

    /// Read `name`, trimmed.
    ///
    /// # Errors
    ///
    /// [`EnvVarError`] if the variable is unset, blank or not UTF-8.
    pub fn get_validated_var(name: &str) -> Result<String, EnvVarError> {
        match std::env::var(name) {
            Ok(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    Err(EnvVarError::Empty {
                        name: name.to_string(),
                    })
                } else {
                    Ok(trimmed.to_string())
                }
            }
            Err(std::env::VarError::NotPresent) => Err(EnvVarError::NotFound {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(EnvVarError::InvalidUtf8 {
                name: name.to_string(),
            }),
        }
    }

    pub fn get_optional_var(name: &str) -> Option<String> {
        Self::get_validated_var(name).ok()
    }
}
