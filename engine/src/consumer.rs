//! Strategies that turn a batch of work items into remote calls.
//!
//! The strategy is picked once, when the engine is built, from
//! [`ConsumerMode`]. Whatever strategy runs, the caller gets exactly one
//! [`ItemResult`] per item it handed in, so logging and replay never need to
//! know which one produced a result.

use crate::common::EngineError;
use crate::context::{ConsumerMode, RunContext};
use crate::model::{Batch, ItemResult, WorkItem, WorkKind};
use crate::stack_api::{PublishTarget, StackApi};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Error recorded for an item a bulk response said nothing about.
pub const NO_OUTCOME_REPORTED: &str = "no outcome reported";

#[async_trait]
pub trait Consumer: Send + Sync {
    fn mode(&self) -> ConsumerMode;

    /// Apply every item of `batch`, returning one result per item.
    async fn apply(&self, batch: Batch) -> Vec<ItemResult>;
}

/// Environments and locales an item is sent to, when its payload names them.
type Destinations = Option<(Vec<String>, Vec<String>)>;

/// Sends each batch as one bulk call per work kind and destination set.
///
/// Items only share a call when they reach the same environments and
/// locales, so a bulk call never widens what a single item asked for.
pub struct BulkConsumer {
    api: Arc<dyn StackApi>,
}

impl BulkConsumer {
    pub fn new(api: Arc<dyn StackApi>) -> Self {
        Self { api }
    }

    async fn apply_group(&self, kind: WorkKind, items: Vec<WorkItem>) -> Vec<ItemResult> {
        log::debug!("Submitting bulk {} of {} items", kind, items.len());

        let mut response = match self.api.bulk(kind, &items).await {
            Ok(response) => response,
            Err(e) => {
                let error = EngineError::from(e).to_string();
                log::error!("Bulk {} of {} items failed: {}", kind, items.len(), error);
                return items
                    .into_iter()
                    .map(|item| ItemResult::failure(item, error.clone()))
                    .collect();
            }
        };

        items
            .into_iter()
            .map(|item| match response.take(&item.key()) {
                Some(outcome) => ItemResult::from_result(item, outcome),
                None => {
                    log::error!(
                        "Bulk {} response has no outcome for {}",
                        kind,
                        item.identity()
                    );
                    ItemResult::failure(item, format!("{NO_OUTCOME_REPORTED} by bulk {kind}"))
                }
            })
            .collect()
    }
}

#[async_trait]
impl Consumer for BulkConsumer {
    fn mode(&self) -> ConsumerMode {
        ConsumerMode::Bulk
    }

    async fn apply(&self, batch: Batch) -> Vec<ItemResult> {
        let mut groups: BTreeMap<(WorkKind, Destinations), Vec<WorkItem>> = BTreeMap::new();
        for item in batch.into_items() {
            let destinations = PublishTarget::of(&item).map(|target| target.destinations());
            groups
                .entry((item.kind(), destinations))
                .or_default()
                .push(item);
        }

        let mut results = Vec::new();
        for ((kind, _), items) in groups {
            results.extend(self.apply_group(kind, items).await);
        }
        results
    }
}

/// Sends one request per item, at most `concurrency` at a time.
pub struct SingleConsumer {
    api: Arc<dyn StackApi>,
    concurrency: usize,
}

impl SingleConsumer {
    pub fn new(api: Arc<dyn StackApi>, concurrency: usize) -> Self {
        Self {
            api,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl Consumer for SingleConsumer {
    fn mode(&self) -> ConsumerMode {
        ConsumerMode::Single
    }

    async fn apply(&self, batch: Batch) -> Vec<ItemResult> {
        let api = &self.api;
        stream::iter(batch.into_items())
            .map(|item| async move {
                let result = api.apply(&item).await.map_err(EngineError::from);
                if let Err(e) = &result {
                    log::warn!("{} of {} failed: {}", item.kind(), item.identity(), e);
                }
                ItemResult::from_result(item, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}

/// Build the consumer selected by `mode`.
pub fn consumer_for(mode: ConsumerMode, api: Arc<dyn StackApi>, ctx: &RunContext) -> Arc<dyn Consumer> {
    match mode {
        ConsumerMode::Bulk => Arc::new(BulkConsumer::new(api)),
        ConsumerMode::Single => Arc::new(SingleConsumer::new(api, ctx.concurrency())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemIdentity;
    use crate::stack_api::{BulkResponse, ListQuery, Page, StackApiError};
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedApi {
        bulk_calls: Mutex<Vec<(WorkKind, usize)>>,
        single_calls: Mutex<Vec<String>>,
        drop_keys: Vec<String>,
        fail_uid: Option<String>,
    }

    #[async_trait]
    impl StackApi for ScriptedApi {
        async fn list(&self, _: &ListQuery, _: u64, _: u64) -> Result<Page, StackApiError> {
            Ok(Page::default())
        }

        async fn apply(&self, item: &WorkItem) -> Result<Value, StackApiError> {
            self.single_calls.lock().unwrap().push(item.key());
            if item.identity().uid() == self.fail_uid.as_deref() {
                return Err(StackApiError::Status {
                    url: "u".into(),
                    status: 422,
                    body: "invalid".into(),
                });
            }
            Ok(json!({"notice": "ok"}))
        }

        async fn bulk(&self, kind: WorkKind, items: &[WorkItem]) -> Result<BulkResponse, StackApiError> {
            self.bulk_calls.lock().unwrap().push((kind, items.len()));
            let mut response = BulkResponse::new();
            for item in items {
                if !self.drop_keys.contains(&item.key()) {
                    response.insert(item.key(), Ok(json!({"job_id": "j1"})));
                }
            }
            Ok(response)
        }

        async fn download(&self, _: &str) -> Result<Vec<u8>, StackApiError> {
            Ok(Vec::new())
        }
    }

    fn item(uid: &str, kind: WorkKind) -> WorkItem {
        WorkItem::new(ItemIdentity::entity("entries", uid, None), kind, json!({}))
    }

    #[tokio::test]
    async fn test_bulk_consumer_groups_by_kind() {
        let api = Arc::new(ScriptedApi::default());
        let consumer = BulkConsumer::new(api.clone());

        let batch = Batch::new(
            1,
            vec![
                item("a", WorkKind::Publish),
                item("b", WorkKind::Unpublish),
                item("c", WorkKind::Publish),
            ],
        );
        let results = consumer.apply(batch).await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(ItemResult::is_success));
        assert_eq!(
            *api.bulk_calls.lock().unwrap(),
            vec![(WorkKind::Publish, 2), (WorkKind::Unpublish, 1)]
        );
    }

    #[tokio::test]
    async fn test_bulk_consumer_marks_unmapped_items_failed() {
        let api = Arc::new(ScriptedApi {
            drop_keys: vec!["entries:b".to_string()],
            ..Default::default()
        });
        let consumer = BulkConsumer::new(api);

        let results = consumer
            .apply(Batch::new(
                1,
                vec![item("a", WorkKind::Publish), item("b", WorkKind::Publish)],
            ))
            .await;

        let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].item.key(), "entries:b");
        assert!(matches!(
            &failed[0].outcome,
            crate::model::Outcome::Failure { error } if error.starts_with(NO_OUTCOME_REPORTED)
        ));
    }

    /// Records the locales of every bulk call and rejects items whose payload
    /// is not a publish target.
    #[derive(Default)]
    struct TargetAwareApi {
        bulk_locales: Mutex<Vec<Vec<Vec<String>>>>,
    }

    #[async_trait]
    impl StackApi for TargetAwareApi {
        async fn list(&self, _: &ListQuery, _: u64, _: u64) -> Result<Page, StackApiError> {
            Ok(Page::default())
        }

        async fn apply(&self, _: &WorkItem) -> Result<Value, StackApiError> {
            Ok(json!({"notice": "ok"}))
        }

        async fn bulk(&self, _: WorkKind, items: &[WorkItem]) -> Result<BulkResponse, StackApiError> {
            let mut response = BulkResponse::new();
            let mut locales = Vec::new();
            for item in items {
                match PublishTarget::of(item) {
                    Some(target) => {
                        locales.push(target.locales);
                        response.insert(item.key(), Ok(json!({"job_id": "j1"})));
                    }
                    None => response.insert(item.key(), Err("invalid publish payload".to_string())),
                }
            }
            self.bulk_locales.lock().unwrap().push(locales);
            Ok(response)
        }

        async fn download(&self, _: &str) -> Result<Vec<u8>, StackApiError> {
            Ok(Vec::new())
        }
    }

    fn localized(uid: &str, locale: &str, payload: Value) -> WorkItem {
        WorkItem::new(
            ItemIdentity::entity("entries", uid, Some(locale.into())),
            WorkKind::Publish,
            payload,
        )
    }

    fn publish_to(locale: &str) -> Value {
        json!({"content_type": "blog_post", "environments": ["production"], "locales": [locale]})
    }

    #[tokio::test]
    async fn test_bulk_consumer_keeps_locales_apart() {
        let api = Arc::new(TargetAwareApi::default());
        let consumer = BulkConsumer::new(api.clone());

        let results = consumer
            .apply(Batch::new(
                1,
                vec![
                    localized("a", "en-us", publish_to("en-us")),
                    localized("b", "fr-fr", publish_to("fr-fr")),
                    localized("c", "en-us", publish_to("en-us")),
                ],
            ))
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(ItemResult::is_success));
        let calls = api.bulk_locales.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                vec![vec!["en-us".to_string()], vec!["en-us".to_string()]],
                vec![vec!["fr-fr".to_string()]],
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_item_fails_alone() {
        let api = Arc::new(TargetAwareApi::default());
        let consumer = BulkConsumer::new(api);

        let results = consumer
            .apply(Batch::new(
                1,
                vec![
                    localized("a", "en-us", publish_to("en-us")),
                    localized("bad", "en-us", json!({"environments": "not-a-list"})),
                    localized("c", "en-us", publish_to("en-us")),
                ],
            ))
            .await;

        assert_eq!(results.len(), 3);
        let failed: Vec<String> = results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.item.key())
            .collect();
        assert_eq!(failed, vec!["entries:bad:en-us"]);
    }

    #[tokio::test]
    async fn test_single_consumer_calls_once_per_item() {
        let api = Arc::new(ScriptedApi {
            fail_uid: Some("b".to_string()),
            ..Default::default()
        });
        let consumer = SingleConsumer::new(api.clone(), 2);

        let results = consumer
            .apply(Batch::new(
                1,
                vec![
                    item("a", WorkKind::Update),
                    item("b", WorkKind::Update),
                    item("c", WorkKind::Update),
                ],
            ))
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 2);
        let failed = results.iter().find(|r| !r.is_success()).unwrap();
        assert!(matches!(
            &failed.outcome,
            crate::model::Outcome::Failure { error } if error.starts_with("Transport error")
        ));
        assert_eq!(api.single_calls.lock().unwrap().len(), 3);
        assert!(api.bulk_calls.lock().unwrap().is_empty());
        assert_eq!(consumer.mode(), ConsumerMode::Single);
    }
}
