//! Remote stack API contract.
//!
//! The engine never talks HTTP directly. Everything it needs from the
//! content management platform goes through the [`StackApi`] trait:
//! listing a page of a collection, applying one mutation, applying a bulk
//! mutation and downloading an asset file. [`HttpStackApi`] is the production
//! implementation; tests use in-memory fakes.

pub mod client;
pub mod errors;
pub mod types;

pub use client::{HttpStackApi, RetryPolicy};
pub use errors::StackApiError;
pub use types::{BulkResponse, ListQuery, ModuleKind, Page, PublishTarget, UpdatePatch};

use crate::model::{WorkItem, WorkKind};
use async_trait::async_trait;
use serde_json::Value;

/// Operations the engine performs against a stack.
///
/// Implementations own their transport concerns (authentication, timeouts,
/// request pacing and retry with backoff). A returned error is final for
/// that call.
#[async_trait]
pub trait StackApi: Send + Sync {
    /// List one page of a collection starting at `skip`.
    ///
    /// `Page::count` carries the total size of the collection when the remote
    /// reports it.
    async fn list(&self, query: &ListQuery, skip: u64, limit: u64) -> Result<Page, StackApiError>;

    /// Apply a single publish, unpublish or update item.
    async fn apply(&self, item: &WorkItem) -> Result<Value, StackApiError>;

    /// Apply several items of the same kind in one bulk request.
    ///
    /// The response maps [`WorkItem::key`] to a per-item outcome. Items
    /// missing from the response are treated as failed by the caller.
    async fn bulk(&self, kind: WorkKind, items: &[WorkItem]) -> Result<BulkResponse, StackApiError>;

    /// Download a binary resource, such as an asset file.
    async fn download(&self, url: &str) -> Result<Vec<u8>, StackApiError>;
}
