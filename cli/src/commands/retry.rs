use super::export::{ExportConsumer, Exporter};
use super::{CommandReport, listen_for_shutdown};
use crate::cli::Command;
use crate::error::{AppError, AppResult};
use engine::bulk_operations::BulkEngine;
use engine::consumer::{Consumer, consumer_for};
use engine::context::RunContext;
use engine::oplog::ReplayPlan;
use engine::oplog::replay::RETRY_SUFFIX;
use engine::stack_api::StackApi;
use std::path::Path;
use std::sync::Arc;

/// Replay the failed items of `error_log` under `<task>-retry`.
///
/// The log must come from the same kind of command. Nothing is listed from
/// the stack; the items are rebuilt from the records.
pub async fn run(
    command: &Command,
    error_log: &Path,
    ctx: RunContext,
    api: Arc<dyn StackApi>,
) -> AppResult<CommandReport> {
    let plan = ReplayPlan::load(error_log)?;

    let original = plan.task().strip_suffix(RETRY_SUFFIX).unwrap_or(plan.task());
    if original != command.task() {
        return Err(AppError::Config(format!(
            "{} holds failures of '{}', it cannot be replayed by '{}'",
            error_log.display(),
            plan.task(),
            command.task()
        )));
    }

    let mut engine = BulkEngine::new(plan.retry_context(ctx), api.clone())?;
    if plan.is_empty() {
        println!("Nothing to replay in {}", error_log.display());
        return Ok(CommandReport {
            report: engine.finish(),
            checkpoint: None,
            aborted: None,
        });
    }

    let consumer: Arc<dyn Consumer> = match command {
        Command::Export(args) => Arc::new(ExportConsumer::new(
            Exporter::new(api, &args.dir),
            engine.context().concurrency(),
        )),
        _ => consumer_for(plan.mode(), api, engine.context()),
    };

    let listener = listen_for_shutdown(engine.shutdown_token());
    let dispatched = engine.retry(plan, consumer).await;
    listener.abort();
    log::info!("Replayed {dispatched} items from {}", error_log.display());

    Ok(CommandReport {
        report: engine.finish(),
        checkpoint: None,
        aborted: None,
    })
}
