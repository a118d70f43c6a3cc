//! Resumable, rate-gated bulk processing of paginated collections.
//!
//! The pieces, leaves first:
//!
//! - `cursor`: pagination progress of one scan and its serializable snapshot
//! - `executor`: runs a batch with bounded parallelism and a duration floor
//! - `paginator`: the page loop as an explicit state machine
//! - `dispatch`: accumulates items and flushes them to a consumer
//! - `checkpoint`: persists cursor snapshots between runs
//! - `handler`: the [`BulkEngine`] tying them to the logs and the shutdown hook

pub mod checkpoint;
pub mod cursor;
pub mod dispatch;
pub mod executor;
pub mod handler;
pub mod paginator;

pub use checkpoint::{CursorStore, FileCursorStore};
pub use cursor::{PersistentCursor, SyncCursor};
pub use dispatch::DispatchQueue;
pub use executor::RateGatedBatchExecutor;
pub use handler::{BulkEngine, RunReport};
pub use paginator::{PageInfo, Paginator, ScanOutcome, ScanState, ScanSummary};
