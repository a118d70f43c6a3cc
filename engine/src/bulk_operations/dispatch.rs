use super::executor::RateGatedBatchExecutor;
use crate::consumer::{Consumer, NO_OUTCOME_REPORTED};
use crate::context::{ConsumerMode, RunContext};
use crate::model::{Batch, ItemResult, WorkItem};
use std::collections::HashSet;
use std::sync::Arc;

/// Accumulates work items and hands them to a [`Consumer`] in batches.
///
/// Reaching the threshold flushes immediately. [`flush`](Self::flush) drains
/// whatever is left; an empty buffer never reaches the consumer. Each consumer
/// call goes through the executor's duration floor.
pub struct DispatchQueue {
    threshold: usize,
    buffer: Vec<WorkItem>,
    consumer: Arc<dyn Consumer>,
    executor: RateGatedBatchExecutor,
    batches: u64,
}

impl DispatchQueue {
    pub fn new(threshold: usize, consumer: Arc<dyn Consumer>, executor: RateGatedBatchExecutor) -> Self {
        let threshold = threshold.max(1);
        Self {
            threshold,
            buffer: Vec::with_capacity(threshold),
            consumer,
            executor,
            batches: 0,
        }
    }

    pub fn from_context(ctx: &RunContext, consumer: Arc<dyn Consumer>) -> Self {
        Self::new(
            ctx.batch_size(),
            consumer,
            RateGatedBatchExecutor::from_context(ctx),
        )
    }

    pub fn consumer_mode(&self) -> ConsumerMode {
        self.consumer.mode()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Items waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Batches handed to the consumer so far.
    pub fn batches_dispatched(&self) -> u64 {
        self.batches
    }

    /// Buffer `item`, flushing when the threshold is reached.
    ///
    /// Returns the results of that flush, or nothing if the item was only
    /// buffered.
    pub async fn enqueue(&mut self, item: WorkItem) -> Vec<ItemResult> {
        self.buffer.push(item);
        if self.buffer.len() >= self.threshold {
            self.flush().await
        } else {
            Vec::new()
        }
    }

    /// Send every buffered item to the consumer in one call.
    pub async fn flush(&mut self) -> Vec<ItemResult> {
        if self.buffer.is_empty() {
            return Vec::new();
        }

        let items = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.threshold));
        self.batches += 1;
        let batch = Batch::new(self.batches, items);
        let expected: Vec<WorkItem> = batch.items().to_vec();

        log::debug!(
            "Dispatching batch {} of {} items to {} consumer",
            batch.number(),
            batch.len(),
            self.consumer.mode()
        );

        let consumer = self.consumer.clone();
        let results = self.executor.gate(consumer.apply(batch)).await;
        reconcile(expected, results)
    }
}

/// Make sure every dispatched item has a result.
fn reconcile(expected: Vec<WorkItem>, mut results: Vec<ItemResult>) -> Vec<ItemResult> {
    if results.len() == expected.len() {
        return results;
    }

    let reported: HashSet<String> = results.iter().map(|r| r.item.key()).collect();
    for item in expected {
        if !reported.contains(&item.key()) {
            log::error!("Consumer returned no result for {}", item.identity());
            results.push(ItemResult::failure(item, NO_OUTCOME_REPORTED));
        }
    }
    results
}
