//! Tasks run by the `stackshift` subcommands.
//!
//! Each task turns its arguments into list queries and work items and hands
//! them to a [`BulkEngine`]. This module owns what every task shares: the
//! checkpoint of a fresh or resumed run, the Ctrl+C hook and the final report.

pub mod export;
pub mod publish;
pub mod retry;
pub mod update;

use crate::cli::{Command, ExportArgs, GlobalArgs, PublishArgs, UpdateArgs};
use crate::error::{AppResult, EXIT_FAILURES, EXIT_INTERRUPTED, EXIT_OK};
use engine::bulk_operations::{BulkEngine, CursorStore, FileCursorStore, RunReport};
use engine::common::{EngineError, EngineResult};
use engine::context::{ConsumerMode, RunContext};
use engine::model::WorkKind;
use engine::stack_api::{ListQuery, ModuleKind, StackApi};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Run options that are not part of the [`RunContext`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub resume: Option<PathBuf>,
    pub retry_failed: Option<PathBuf>,
}

impl From<&GlobalArgs> for RunOptions {
    fn from(args: &GlobalArgs) -> Self {
        Self {
            resume: args.resume.clone(),
            retry_failed: args.retry_failed.clone(),
        }
    }
}

/// Outcome of one command: the engine's report, where the cursors went and
/// the error that aborted the run, if any.
#[derive(Debug)]
pub struct CommandReport {
    pub report: RunReport,
    pub checkpoint: Option<PathBuf>,
    pub aborted: Option<EngineError>,
}

impl CommandReport {
    pub fn exit_code(&self) -> u8 {
        if self.report.interrupted {
            EXIT_INTERRUPTED
        } else if self.aborted.is_some() || self.report.has_failures() {
            EXIT_FAILURES
        } else {
            EXIT_OK
        }
    }
}

impl fmt::Display for CommandReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.report)?;
        if let Some(error) = &self.aborted {
            write!(f, "\nRun aborted: {error}")?;
        }
        if let Some(checkpoint) = &self.checkpoint {
            if self.report.interrupted || self.aborted.is_some() {
                write!(f, "\nResume with: --resume {}", checkpoint.display())?;
            }
        }
        if self.report.has_failures() {
            write!(f, "\nRetry with: --retry-failed {}", self.report.logs.error.display())?;
        }
        Ok(())
    }
}

/// A command with its inputs read and checked, ready to run.
enum Task<'a> {
    Export(&'a ExportArgs),
    Publish(WorkKind, &'a PublishArgs),
    Update(&'a UpdateArgs, Value),
}

impl<'a> Task<'a> {
    /// Check the arguments and read local inputs. Nothing remote is touched.
    fn prepare(command: &'a Command) -> AppResult<Self> {
        match command {
            Command::Export(args) => Ok(Task::Export(args)),
            Command::Publish(args) => publish::check(args).map(|_| Task::Publish(WorkKind::Publish, args)),
            Command::Unpublish(args) => {
                publish::check(args).map(|_| Task::Publish(WorkKind::Unpublish, args))
            }
            Command::Update(args) => Ok(Task::Update(args, update::load_patch(&args.patch)?)),
        }
    }

    fn consumer_mode(&self, configured: ConsumerMode) -> ConsumerMode {
        match self {
            Task::Export(_) | Task::Update(..) => ConsumerMode::Single,
            Task::Publish(_, args) => args.consumer_mode().unwrap_or(configured),
        }
    }
}

/// Run `command` against `api`.
///
/// A run that starts always produces a [`CommandReport`], including when a
/// page fetch aborts it. Errors are returned only when the run cannot start.
pub async fn execute(
    command: &Command,
    options: RunOptions,
    ctx: RunContext,
    api: Arc<dyn StackApi>,
) -> AppResult<CommandReport> {
    if let Some(error_log) = &options.retry_failed {
        return retry::run(command, error_log, ctx, api).await;
    }

    let task = Task::prepare(command)?;
    let mode = task.consumer_mode(ctx.consumer_mode());
    let ctx = ctx.with_consumer_mode(mode);
    let (store, checkpoint) = open_checkpoint(&ctx, options.resume.as_deref())?;

    let mut engine = BulkEngine::new(ctx, api.clone())?.with_checkpoint(store);
    let listener = listen_for_shutdown(engine.shutdown_token());

    let result = match task {
        Task::Export(args) => export::run(&mut engine, api, args).await,
        Task::Publish(kind, args) => publish::run(&mut engine, api, kind, args).await,
        Task::Update(args, patch) => update::run(&mut engine, api, args, patch).await,
    };
    listener.abort();

    if let Err(e) = &result {
        if e.is_fatal() {
            log::error!("Run aborted: {e}");
        } else {
            log::warn!("Run stopped early: {e}");
        }
    }

    Ok(CommandReport {
        report: engine.finish(),
        checkpoint: Some(checkpoint),
        aborted: result.err(),
    })
}

/// New checkpoint next to the run's logs, or the one given with `--resume`.
fn open_checkpoint(
    ctx: &RunContext,
    resume: Option<&Path>,
) -> AppResult<(Arc<dyn CursorStore>, PathBuf)> {
    match resume {
        Some(path) => {
            let store = FileCursorStore::open(path, ctx.task())?;
            log::info!("Resuming from checkpoint {}", path.display());
            Ok((Arc::new(store), path.to_path_buf()))
        }
        None => {
            let path = ctx
                .log_dir()
                .join(format!("{}.{}.checkpoint.json", ctx.run_id(), ctx.task()));
            Ok((Arc::new(FileCursorStore::create(&path, ctx.task())), path))
        }
    }
}

/// Cancel `token` on the first Ctrl+C.
pub fn listen_for_shutdown(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::warn!("Interrupt received, finishing in-flight work");
                eprintln!("Interrupt received, finishing in-flight work before exiting...");
                token.cancel();
            }
            Err(e) => log::error!("Cannot listen for Ctrl+C: {e}"),
        }
    })
}

/// Uids of every content type of the stack.
pub async fn content_type_uids(engine: &BulkEngine) -> EngineResult<Vec<String>> {
    let content_types = engine
        .collect(&ListQuery::new(ModuleKind::ContentTypes))
        .await?;
    let uids: Vec<String> = content_types
        .iter()
        .filter_map(|ct| ct.get("uid").and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    log::debug!("Stack has {} content types", uids.len());
    Ok(uids)
}

/// `given` when not empty, else every content type of the stack.
async fn resolve_content_types(engine: &BulkEngine, given: &[String]) -> EngineResult<Vec<String>> {
    if given.is_empty() {
        content_type_uids(engine).await
    } else {
        Ok(given.to_vec())
    }
}
