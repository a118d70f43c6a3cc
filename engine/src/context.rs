//! Per-run configuration bundle.
//!
//! A [`RunContext`] is built once per command invocation and handed by
//! reference to every component constructor. Nothing in the engine reads
//! configuration from global state.

use crate::common::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default number of items per dispatch batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Default number of items requested per page.
pub const DEFAULT_PAGE_SIZE: u64 = 100;
/// Largest page the remote list endpoints accept.
pub const MAX_PAGE_SIZE: u64 = 100;
/// Default floor on the wall-clock duration of one batch.
pub const DEFAULT_MIN_BATCH_DURATION: Duration = Duration::from_millis(1000);

/// Which consumer strategy turns batches into remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerMode {
    /// One bulk request per batch.
    Bulk,
    /// One request per item.
    Single,
}

impl ConsumerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerMode::Bulk => "bulk",
            ConsumerMode::Single => "single",
        }
    }
}

impl fmt::Display for ConsumerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsumerMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bulk" => Ok(ConsumerMode::Bulk),
            "single" => Ok(ConsumerMode::Single),
            other => Err(EngineError::FatalConfig(format!(
                "unknown consumer mode '{other}' (expected 'bulk' or 'single')"
            ))),
        }
    }
}

/// Connection details of the target stack.
#[derive(Clone)]
pub struct StackTarget {
    base_url: String,
    api_key: String,
    management_token: String,
    branch: Option<String>,
}

impl fmt::Debug for StackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackTarget")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .field("management_token", &"<redacted>")
            .field("branch", &self.branch)
            .finish()
    }
}

impl StackTarget {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        management_token: impl Into<String>,
        branch: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            management_token: management_token.into(),
            branch,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn management_token(&self) -> &str {
        &self.management_token
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }
}

/// Read-only configuration for one invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    stack: StackTarget,
    task: String,
    run_id: String,
    consumer_mode: ConsumerMode,
    concurrency: usize,
    batch_size: usize,
    page_size: u64,
    min_batch_duration: Duration,
    log_dir: PathBuf,
}

impl RunContext {
    /// Create a context with default limits, stamped with the current time.
    pub fn new(task: impl Into<String>, stack: StackTarget, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            stack,
            task: task.into(),
            run_id: run_id_for(Utc::now()),
            consumer_mode: ConsumerMode::Bulk,
            concurrency: DEFAULT_BATCH_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            min_batch_duration: DEFAULT_MIN_BATCH_DURATION,
            log_dir: log_dir.into(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    pub fn with_consumer_mode(mut self, mode: ConsumerMode) -> Self {
        self.consumer_mode = mode;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_min_batch_duration(mut self, duration: Duration) -> Self {
        self.min_batch_duration = duration;
        self
    }

    /// Reject contexts a run could not be started with.
    ///
    /// Called before any remote call is made.
    pub fn validate(&self) -> EngineResult<()> {
        if self.task.trim().is_empty() {
            return Err(EngineError::FatalConfig("task name is empty".into()));
        }
        if self.task.contains(&['.', '/', '\\'][..]) {
            return Err(EngineError::FatalConfig(format!(
                "task name '{}' must not contain '.', '/' or '\\'",
                self.task
            )));
        }
        if self.stack.base_url.is_empty() {
            return Err(EngineError::FatalConfig("stack base URL is empty".into()));
        }
        if self.stack.api_key.is_empty() {
            return Err(EngineError::FatalConfig("stack API key is missing".into()));
        }
        if self.stack.management_token.is_empty() {
            return Err(EngineError::FatalConfig(
                "stack management token is missing".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(EngineError::FatalConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(EngineError::FatalConfig("batch size must be at least 1".into()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(EngineError::FatalConfig(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        Ok(())
    }

    pub fn stack(&self) -> &StackTarget {
        &self.stack
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn consumer_mode(&self) -> ConsumerMode {
        self.consumer_mode
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn min_batch_duration(&self) -> Duration {
        self.min_batch_duration
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// Sortable, file-name safe run id such as `20261019T101500123Z`.
pub fn run_id_for(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%3fZ").to_string()
}
