#![allow(dead_code)]

use async_trait::async_trait;
use engine::context::{RunContext, StackTarget};
use engine::model::{ItemIdentity, WorkItem, WorkKind};
use engine::stack_api::{BulkResponse, ListQuery, Page, StackApi, StackApiError};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// In-memory stack serving one collection for every list query.
#[derive(Default)]
pub struct FakeStack {
    pub resources: Vec<Value>,
    /// Total reported by list calls; defaults to the collection size.
    pub reported_count: Option<u64>,
    /// Uids whose mutations fail.
    pub failing: HashSet<String>,
    /// Skip offset at which listing fails.
    pub fail_list_at: Option<u64>,
    pub list_calls: Mutex<Vec<(u64, u64)>>,
    pub bulk_calls: Mutex<Vec<Vec<String>>>,
    /// `locales` of each item's payload, per bulk call.
    pub bulk_locales: Mutex<Vec<Vec<Value>>>,
    pub apply_calls: Mutex<Vec<String>>,
}

impl FakeStack {
    pub fn with_entries(count: usize) -> Self {
        Self {
            resources: (0..count)
                .map(|n| json!({"uid": format!("blt{n:03}"), "title": format!("Entry {n}")}))
                .collect(),
            ..Default::default()
        }
    }

    pub fn failing(mut self, uids: &[&str]) -> Self {
        self.failing = uids.iter().map(|uid| uid.to_string()).collect();
        self
    }

    /// Skip offsets of page requests, without the one-item count probe.
    pub fn page_skips(&self) -> Vec<u64> {
        self.list_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, limit)| *limit != 1)
            .map(|(skip, _)| *skip)
            .collect()
    }

    pub fn bulk_sizes(&self) -> Vec<usize> {
        self.bulk_calls.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn mutated_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.apply_calls.lock().unwrap().clone();
        keys.extend(self.bulk_calls.lock().unwrap().iter().flatten().cloned());
        keys.sort();
        keys
    }

    fn outcome(&self, item: &WorkItem) -> Result<Value, String> {
        match item.identity().uid() {
            Some(uid) if self.failing.contains(uid) => Err(format!("HTTP 422: {uid} is invalid")),
            _ => Ok(json!({"notice": format!("{} done", item.kind())})),
        }
    }
}

#[async_trait]
impl StackApi for FakeStack {
    async fn list(&self, _query: &ListQuery, skip: u64, limit: u64) -> Result<Page, StackApiError> {
        self.list_calls.lock().unwrap().push((skip, limit));
        if self.fail_list_at == Some(skip) && limit != 1 {
            return Err(StackApiError::RequestFailed {
                url: "https://fake.test/v3/entries".into(),
                reason: "connection reset".into(),
            });
        }

        let start = (skip as usize).min(self.resources.len());
        let end = (start + limit as usize).min(self.resources.len());
        Ok(Page {
            items: self.resources[start..end].to_vec(),
            count: Some(self.reported_count.unwrap_or(self.resources.len() as u64)),
        })
    }

    async fn apply(&self, item: &WorkItem) -> Result<Value, StackApiError> {
        self.apply_calls.lock().unwrap().push(item.key());
        self.outcome(item).map_err(|body| StackApiError::Status {
            url: "https://fake.test/v3".into(),
            status: 422,
            body,
        })
    }

    async fn bulk(&self, _kind: WorkKind, items: &[WorkItem]) -> Result<BulkResponse, StackApiError> {
        self.bulk_calls
            .lock()
            .unwrap()
            .push(items.iter().map(WorkItem::key).collect());
        self.bulk_locales
            .lock()
            .unwrap()
            .push(items.iter().map(|item| item.payload()["locales"].clone()).collect());

        let mut response = BulkResponse::new();
        for item in items {
            response.insert(item.key(), self.outcome(item));
        }
        Ok(response)
    }

    async fn download(&self, _url: &str) -> Result<Vec<u8>, StackApiError> {
        Ok(b"binary".to_vec())
    }
}

pub fn context(task: &str, log_dir: &Path) -> RunContext {
    RunContext::new(
        task,
        StackTarget::new("https://fake.test", "blt_api_key", "cs_token", None),
        log_dir,
    )
    .with_page_size(10)
    .with_batch_size(10)
    .with_min_batch_duration(Duration::ZERO)
}

/// Converter used by publish-style tests.
pub fn publish_item(query: &ListQuery) -> impl Fn(Value) -> Option<WorkItem> + '_ {
    move |resource| {
        let identity = query.identity_of(&resource)?;
        Some(WorkItem::new(
            identity,
            WorkKind::Publish,
            json!({"content_type": "blog_post", "environments": ["production"], "locales": ["en-us"]}),
        ))
    }
}

/// Converter publishing to the query's own locale.
pub fn localized_publish_item(query: &ListQuery) -> impl Fn(Value) -> Option<WorkItem> + '_ {
    move |resource| {
        let identity = query.identity_of(&resource)?;
        Some(WorkItem::new(
            identity,
            WorkKind::Publish,
            json!({"content_type": "blog_post", "environments": ["production"], "locales": [query.locale]}),
        ))
    }
}

/// Converter used by export-style tests.
pub fn fetch_item(query: &ListQuery) -> impl Fn(Value) -> Option<WorkItem> + '_ {
    move |resource| {
        let identity = query.identity_of(&resource)?;
        Some(WorkItem::new(identity, WorkKind::Fetch, resource))
    }
}

pub fn uid_of(identity: &ItemIdentity) -> String {
    identity.uid().unwrap_or_default().to_string()
}

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
