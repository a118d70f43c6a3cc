use crate::context::RunContext;
use crate::model::{Batch, ItemResult, WorkItem};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Runs batches with bounded parallelism and a wall-clock floor per batch.
///
/// Every item of a batch is started as soon as a concurrency slot is free.
/// Once all of them have settled the executor sleeps until
/// `min_batch_duration` has passed since the batch started, so consecutive
/// batches are at least that far apart. A batch that already took longer
/// returns immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateGatedBatchExecutor {
    concurrency: usize,
    min_batch_duration: Duration,
}

impl RateGatedBatchExecutor {
    pub fn new(concurrency: usize, min_batch_duration: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            min_batch_duration,
        }
    }

    pub fn from_context(ctx: &RunContext) -> Self {
        Self::new(ctx.concurrency(), ctx.min_batch_duration())
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn min_batch_duration(&self) -> Duration {
        self.min_batch_duration
    }

    /// Execute every item of `batch` and return one result per item.
    ///
    /// A failing item is recorded as a failed [`ItemResult`]; its siblings
    /// keep running. Results come back in completion order.
    pub async fn run<F, Fut, E>(&self, batch: Batch, per_item: F) -> Vec<ItemResult>
    where
        F: Fn(WorkItem) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        let batch_number = batch.number();
        let size = batch.len();
        let per_item = &per_item;

        self.gate(async move {
            log::debug!(
                "Running batch {} with {} items (concurrency {})",
                batch_number,
                size,
                self.concurrency
            );

            let results: Vec<ItemResult> = stream::iter(batch.into_items())
                .map(|item| async move {
                    let outcome = per_item(item.clone()).await;
                    ItemResult::from_result(item, outcome)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            let failed = results.iter().filter(|r| !r.is_success()).count();
            if failed > 0 {
                log::warn!(
                    "Batch {} finished with {} of {} items failed",
                    batch_number,
                    failed,
                    size
                );
            }
            results
        })
        .await
    }

    /// Await `work` and then hold until the minimum batch duration has passed.
    pub async fn gate<Fut, T>(&self, work: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let started = Instant::now();
        let output = work.await;

        let elapsed = started.elapsed();
        if let Some(remaining) = self.min_batch_duration.checked_sub(elapsed) {
            if !remaining.is_zero() {
                log::trace!("Batch took {elapsed:?}, holding for {remaining:?}");
                tokio::time::sleep(remaining).await;
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemIdentity, WorkKind};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn batch(size: usize) -> Batch {
        let items = (0..size)
            .map(|n| {
                WorkItem::new(
                    ItemIdentity::entity("assets", format!("blt{n}"), None),
                    WorkKind::Publish,
                    json!({}),
                )
            })
            .collect();
        Batch::new(1, items)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_batch_is_held_to_minimum_duration() {
        let executor = RateGatedBatchExecutor::new(10, Duration::from_millis(1000));
        let started = Instant::now();

        let results = executor
            .run(batch(10), |_| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, String>(json!({}))
            })
            .await;

        assert_eq!(results.len(), 10);
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_batch_gets_no_extra_delay() {
        let executor = RateGatedBatchExecutor::new(10, Duration::from_millis(1000));
        let started = Instant::now();

        executor
            .run(batch(3), |_| async {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                Ok::<_, String>(json!({}))
            })
            .await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_cancel_siblings() {
        let executor = RateGatedBatchExecutor::new(4, Duration::ZERO);
        let calls = Arc::new(AtomicUsize::new(0));

        let results = executor
            .run(batch(6), |item| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if item.identity().uid() == Some("blt2") {
                        Err("HTTP 422".to_string())
                    } else {
                        Ok(json!({"uid": item.identity().uid()}))
                    }
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(results.len(), 6);
        assert_eq!(results.iter().filter(|r| !r.is_success()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_ceiling_is_respected() {
        let executor = RateGatedBatchExecutor::new(2, Duration::ZERO);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        executor
            .run(batch(10), |_| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(json!({}))
                }
            })
            .await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_applies_floor_to_arbitrary_work() {
        let executor = RateGatedBatchExecutor::new(1, Duration::from_millis(300));
        let started = Instant::now();
        let value = executor.gate(async { 7 }).await;
        assert_eq!(value, 7);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        assert_eq!(RateGatedBatchExecutor::new(0, Duration::ZERO).concurrency(), 1);
    }
}
