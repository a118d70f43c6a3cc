//! # Stackshift Engine Library
//!
//! Core library for moving and mutating content on a hosted content
//! management stack. It provides the resumable, rate-limited bulk operation
//! engine that the `stackshift` command line tools drive.
//!
//! ## Modules
//!
//! - [`bulk_operations`] - Cursor, paginator, rate-gated executor, dispatch queue and the orchestrator
//! - [`consumer`] - Bulk and single-item consumer strategies
//! - [`oplog`] - Append-only success/error operation logs and replay of failed items
//! - [`stack_api`] - Remote stack API contract and the HTTP client
//! - [`model`] - Work items, identities and per-item results
//! - [`context`] - Per-run configuration bundle
//! - [`common`] - Error taxonomy and request rate limiting
//! - [`utils`] - Utility functions and helpers

pub mod bulk_operations;
pub mod common;
pub mod consumer;
pub mod context;
pub mod model;
pub mod oplog;
pub mod stack_api;
pub mod utils;
