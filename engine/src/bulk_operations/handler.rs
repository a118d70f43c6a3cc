use super::checkpoint::CursorStore;
use super::cursor::PersistentCursor;
use super::dispatch::DispatchQueue;
use super::executor::RateGatedBatchExecutor;
use super::paginator::{PageInfo, Paginator, ScanOutcome, ScanSummary};
use crate::common::{EngineError, EngineResult};
use crate::consumer::Consumer;
use crate::context::RunContext;
use crate::model::{Batch, ItemIdentity, ItemResult, WorkItem, WorkKind};
use crate::oplog::{OperationLogger, ReplayPlan, RunLogPaths};
use crate::stack_api::{ListQuery, StackApi};
use serde_json::Value;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Error recorded for a listed resource that cannot be turned into a work item.
pub const UNUSABLE_RESOURCE: &str = "resource has no usable identity";

/// A scan ready to run, or one the checkpoint says is already done.
enum OpenedScan {
    Ready(Paginator),
    Complete(ScanSummary),
}

/// What a run did, reported once it is finished.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub task: String,
    pub run_id: String,
    pub logs: RunLogPaths,
    pub successes: u64,
    pub failures: u64,
    pub log_write_failures: u64,
    pub interrupted: bool,
    pub scans: Vec<(String, ScanSummary)>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.failures > 0
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run {} of task '{}' {}: {} succeeded, {} failed",
            self.run_id,
            self.task,
            if self.interrupted { "was interrupted" } else { "finished" },
            self.successes,
            self.failures
        )?;
        for (scope, scan) in &self.scans {
            writeln!(
                f,
                "  {scope}: {} items in {} pages, cursor at {} ({:?})",
                scan.items, scan.pages, scan.cursor.last_skip, scan.outcome
            )?;
        }
        writeln!(f, "{}", self.logs)?;
        if self.log_write_failures > 0 {
            writeln!(
                f,
                "{} records could not be written to the logs",
                self.log_write_failures
            )?;
        }
        if self.has_failures() {
            write!(f, "{} items failed; the error log can be replayed", self.failures)
        } else {
            write!(f, "No failures.")
        }
    }
}

/// Runs one task against a stack.
///
/// Owns the logs, the cursors and the shutdown token of the run. Two shapes
/// of work are supported:
///
/// - [`process_scan`](Self::process_scan) walks a collection and runs every
///   page through the [`RateGatedBatchExecutor`]
/// - [`dispatch_scan`](Self::dispatch_scan) walks a collection and feeds the
///   items to a [`DispatchQueue`]
///
/// [`retry`](Self::retry) replays an error log through a `DispatchQueue`
/// without scanning anything.
///
/// Cancelling the [`shutdown_token`](Self::shutdown_token) stops admitting
/// pages and items. Work already handed to a consumer or the executor is
/// finished and logged, buffered items are flushed, and the page in progress
/// is left unacknowledged so a resumed run starts with it again.
pub struct BulkEngine {
    ctx: RunContext,
    api: Arc<dyn StackApi>,
    executor: RateGatedBatchExecutor,
    logger: OperationLogger,
    checkpoint: Option<Arc<dyn CursorStore>>,
    shutdown: CancellationToken,
    scans: Vec<(String, ScanSummary)>,
    interrupted: bool,
}

impl BulkEngine {
    /// Validate `ctx` and create the run's logs.
    ///
    /// # Errors
    ///
    /// [`EngineError::FatalConfig`] if the context is invalid. No remote call
    /// has been made at that point.
    pub fn new(ctx: RunContext, api: Arc<dyn StackApi>) -> EngineResult<Self> {
        ctx.validate()?;
        let logger = OperationLogger::create(&ctx, ctx.consumer_mode());

        log::info!(
            "Starting run {} of task '{}' (batch size {}, concurrency {}, page size {}, min batch {:?})",
            ctx.run_id(),
            ctx.task(),
            ctx.batch_size(),
            ctx.concurrency(),
            ctx.page_size(),
            ctx.min_batch_duration()
        );

        Ok(Self {
            executor: RateGatedBatchExecutor::from_context(&ctx),
            ctx,
            api,
            logger,
            checkpoint: None,
            shutdown: CancellationToken::new(),
            scans: Vec::new(),
            interrupted: false,
        })
    }

    /// Persist cursors to `store` and resume scans it already knows.
    pub fn with_checkpoint(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.checkpoint = Some(store);
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn logger(&self) -> &OperationLogger {
        &self.logger
    }

    /// Token that requests a graceful shutdown when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted || self.shutdown.is_cancelled()
    }

    /// Walk `query` and run every resource through `per_item`.
    ///
    /// Each page is split into batches of the configured size. `to_item`
    /// turns a listed resource into a work item; resources it rejects are
    /// logged as failures.
    ///
    /// # Errors
    ///
    /// [`EngineError::PageFetch`] if a page cannot be listed, or a resume
    /// snapshot for this scope is malformed.
    pub async fn process_scan<T, F, Fut, E>(
        &mut self,
        query: &ListQuery,
        to_item: T,
        per_item: F,
    ) -> EngineResult<ScanSummary>
    where
        T: Fn(Value) -> Option<WorkItem>,
        F: Fn(WorkItem) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        let mut paginator = match self.open_scan(query).await? {
            OpenedScan::Ready(paginator) => paginator,
            OpenedScan::Complete(done) => return Ok(done),
        };

        let api = &self.api;
        let fetch = move |skip: u64, limit: u64| async move {
            api.list(query, skip, limit)
                .await
                .map(|page| page.items)
                .map_err(EngineError::from)
        };

        let executor = self.executor;
        let logger = &self.logger;
        let shutdown = &self.shutdown;
        let batch_size = self.ctx.batch_size();
        let scope = paginator.scope().to_string();
        let (scope, to_item, per_item) = (&scope, &to_item, &per_item);

        let result = paginator
            .scan(fetch, |info: PageInfo, resources: Vec<Value>| async move {
                let mut items = admit(scope, info.skip, resources, to_item, logger).into_iter();
                loop {
                    let chunk: Vec<WorkItem> = items.by_ref().take(batch_size).collect();
                    if chunk.is_empty() {
                        return Ok(());
                    }
                    if shutdown.is_cancelled() {
                        return Err(EngineError::Interrupted);
                    }
                    let results = executor.run(Batch::new(info.number, chunk), per_item).await;
                    logger.record_all(&results);
                }
            })
            .await;

        self.close_scan(&paginator, result)
    }

    /// Walk `query` and feed every resource to `consumer` through a
    /// [`DispatchQueue`].
    ///
    /// The queue is flushed at the end of every page, before the cursor moves
    /// past it.
    pub async fn dispatch_scan<T>(
        &mut self,
        query: &ListQuery,
        to_item: T,
        consumer: Arc<dyn Consumer>,
    ) -> EngineResult<ScanSummary>
    where
        T: Fn(Value) -> Option<WorkItem>,
    {
        if consumer.mode() != self.logger.mode() {
            log::warn!(
                "Consumer mode {} differs from the {} mode the logs are named after",
                consumer.mode(),
                self.logger.mode()
            );
        }

        let mut paginator = match self.open_scan(query).await? {
            OpenedScan::Ready(paginator) => paginator,
            OpenedScan::Complete(done) => return Ok(done),
        };

        let api = &self.api;
        let mut fetch = move |skip: u64, limit: u64| async move {
            api.list(query, skip, limit)
                .await
                .map(|page| page.items)
                .map_err(EngineError::from)
        };
        let mut queue = DispatchQueue::new(self.ctx.batch_size(), consumer, self.executor);
        let scope = paginator.scope().to_string();

        let result = loop {
            let page = match paginator.next_page(&mut fetch).await {
                Ok(Some(page)) => page,
                Ok(None) => break Ok(paginator.summary()),
                Err(e) => break Err(e),
            };

            let mut interrupted = false;
            for item in admit(&scope, page.info.skip, page.items, &to_item, &self.logger) {
                if self.shutdown.is_cancelled() {
                    interrupted = true;
                    break;
                }
                self.logger.record_all(&queue.enqueue(item).await);
            }
            self.logger.record_all(&queue.flush().await);

            if interrupted {
                paginator.interrupt();
                break Ok(paginator.summary());
            }
            paginator.complete_page(&page.info);
        };

        self.close_scan(&paginator, result)
    }

    /// List every resource of `query` without processing it.
    ///
    /// For lookups other scans depend on, such as the content types whose
    /// entries are walked next. The pages follow the same contract as a
    /// scan but no cursor is checkpointed, so a resumed run lists them again.
    ///
    /// # Errors
    ///
    /// [`EngineError::PageFetch`] if a page cannot be listed, and
    /// [`EngineError::Interrupted`] if shutdown was requested before the
    /// listing completed.
    pub async fn collect(&self, query: &ListQuery) -> EngineResult<Vec<Value>> {
        let scope = query.scope();
        let total = self.count(query, &scope).await?;
        let mut paginator = Paginator::new(
            scope,
            PersistentCursor::new(total),
            self.ctx.page_size(),
            self.shutdown.clone(),
        );

        let api = &self.api;
        let mut fetch = move |skip: u64, limit: u64| async move {
            api.list(query, skip, limit)
                .await
                .map(|page| page.items)
                .map_err(EngineError::from)
        };

        let mut resources = Vec::new();
        while let Some(page) = paginator.next_page(&mut fetch).await? {
            paginator.complete_page(&page.info);
            resources.extend(page.items);
        }

        match paginator.summary().outcome {
            ScanOutcome::Interrupted => Err(EngineError::Interrupted),
            _ => Ok(resources),
        }
    }

    /// Dispatch the items of `plan` to `consumer` again.
    ///
    /// Returns how many items were handed to the consumer. Items not admitted
    /// before a shutdown request stay in the original error log.
    pub async fn retry(&mut self, plan: ReplayPlan, consumer: Arc<dyn Consumer>) -> usize {
        let total = plan.len();
        log::info!(
            "Replaying {} items from {} with the {} consumer",
            total,
            plan.source().display(),
            consumer.mode()
        );

        let mut queue = DispatchQueue::new(self.ctx.batch_size(), consumer, self.executor);
        let mut admitted = 0;
        for item in plan.into_items() {
            if self.shutdown.is_cancelled() {
                log::warn!(
                    "Shutdown requested, {} of {} items were not replayed",
                    total - admitted,
                    total
                );
                self.interrupted = true;
                break;
            }
            admitted += 1;
            self.logger.record_all(&queue.enqueue(item).await);
        }
        self.logger.record_all(&queue.flush().await);
        admitted
    }

    /// Close the run and report where its results went.
    pub fn finish(self) -> RunReport {
        let summary = self.logger.summary();
        let report = RunReport {
            task: self.ctx.task().to_string(),
            run_id: self.ctx.run_id().to_string(),
            logs: summary.paths,
            successes: summary.successes,
            failures: summary.failures,
            log_write_failures: summary.write_failures,
            interrupted: self.interrupted || self.shutdown.is_cancelled(),
            scans: self.scans,
        };

        if report.has_failures() {
            log::warn!(
                "Run {} finished with {} failures, see {}",
                report.run_id,
                report.failures,
                report.logs.error.display()
            );
        } else {
            log::info!("Run {} finished without failures", report.run_id);
        }
        report
    }

    /// Build the paginator for `query`, resuming from the checkpoint when it
    /// has a cursor for the scope.
    async fn open_scan(&mut self, query: &ListQuery) -> EngineResult<OpenedScan> {
        let scope = query.scope();

        let saved = match &self.checkpoint {
            Some(store) => store.load(&scope)?,
            None => None,
        };

        let cursor = match saved {
            Some(snapshot) => {
                let cursor = PersistentCursor::load_from(snapshot)?;
                log::info!(
                    "Resuming scan '{}' at skip {} of {} (batch {})",
                    scope,
                    cursor.last_skip(),
                    cursor.total_count(),
                    cursor.last_batch_number()
                );
                if cursor.is_complete() {
                    log::info!("Scan '{}' already complete, skipping", scope);
                    let done = ScanSummary {
                        outcome: ScanOutcome::Completed,
                        pages: 0,
                        items: 0,
                        cursor: cursor.snapshot(),
                    };
                    self.scans.push((scope, done));
                    return Ok(OpenedScan::Complete(done));
                }
                cursor
            }
            None => PersistentCursor::new(self.count(query, &scope).await?),
        };

        let mut paginator = Paginator::new(
            scope,
            cursor,
            self.ctx.page_size(),
            self.shutdown.clone(),
        );
        if let Some(store) = &self.checkpoint {
            paginator = paginator.with_checkpoint(store.clone());
        }
        Ok(OpenedScan::Ready(paginator))
    }

    /// Total size of the collection, taken once when the scan starts.
    async fn count(&self, query: &ListQuery, scope: &str) -> EngineResult<u64> {
        let page_fetch = |reason: String| EngineError::PageFetch {
            scope: scope.to_string(),
            skip: 0,
            reason,
        };

        let page = self
            .api
            .list(query, 0, 1)
            .await
            .map_err(|e| page_fetch(EngineError::from(e).to_string()))?;
        let total = page
            .count
            .ok_or_else(|| page_fetch("remote did not report a total count".to_string()))?;

        log::info!("Scan '{}' covers {} items", scope, total);
        Ok(total)
    }

    fn close_scan(
        &mut self,
        paginator: &Paginator,
        result: EngineResult<ScanSummary>,
    ) -> EngineResult<ScanSummary> {
        let summary = paginator.summary();
        if summary.outcome == ScanOutcome::Interrupted {
            self.interrupted = true;
        }
        self.scans.push((paginator.scope().to_string(), summary));
        result
    }
}

/// Turn listed resources into work items, logging the ones that cannot be.
fn admit<T>(
    scope: &str,
    skip: u64,
    resources: Vec<Value>,
    to_item: &T,
    logger: &OperationLogger,
) -> Vec<WorkItem>
where
    T: Fn(Value) -> Option<WorkItem>,
{
    let mut items = Vec::with_capacity(resources.len());
    for (offset, resource) in resources.into_iter().enumerate() {
        match to_item(resource.clone()) {
            Some(item) => items.push(item),
            None => {
                let identity = ItemIdentity::page(scope, skip + offset as u64);
                log::warn!("Skipping unusable resource at {}", identity);
                let item = WorkItem::new(identity, WorkKind::Fetch, resource);
                logger.record(&ItemResult::failure(item, UNUSABLE_RESOURCE));
            }
        }
    }
    items
}
