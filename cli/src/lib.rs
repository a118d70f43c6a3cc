//! # Stackshift CLI
//!
//! Command line front end of the stackshift engine: argument parsing,
//! configuration layering, logging setup and the export, publish, unpublish
//! and update tasks.
//!
//! ## Modules
//!
//! - [`cli`] - Command line arguments
//! - [`commands`] - The tasks behind each subcommand, resume and replay
//! - [`config`] - `stackshift.toml` and environment configuration
//! - [`error`] - Application errors and exit codes
//! - [`logger`] - Logging configuration

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;

pub use error::{AppError, AppResult};

use cli::Cli;
use commands::RunOptions;
use engine::stack_api::HttpStackApi;
use std::sync::Arc;

/// Load the configuration, run the command and print its report.
///
/// Returns the process exit code.
pub async fn run(cli: Cli) -> AppResult<u8> {
    let mut config = config::load_config(cli.global.config.as_deref())?;
    config.apply_overrides(&cli.global);
    config
        .validate()
        .map_err(config::ConfigError::Invalid)?;

    logger::setup_logger(config.logging(), cli.global.verbose)?;

    let ctx = config.run_context(cli.command.task())?;
    let api = HttpStackApi::new(ctx.stack().clone(), config.limits(), config.http().timeout())?
        .with_retry_policy(config.http().retry_policy());

    let outcome = commands::execute(
        &cli.command,
        RunOptions::from(&cli.global),
        ctx,
        Arc::new(api),
    )
    .await?;

    println!("{outcome}");
    Ok(outcome.exit_code())
}
