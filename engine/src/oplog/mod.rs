//! Durable per-item audit logs.
//!
//! Every processed work item produces exactly one [`OperationRecord`], written
//! as one JSON line to either the success or the error log of the run:
//!
//! ```text
//! <log_dir>/<run_id>.<task>.<mode>.success
//! <log_dir>/<run_id>.<task>.<mode>.error
//! ```
//!
//! The record layout is the contract between [`OperationLogger`] and
//! [`replay::ReplayPlan`]. It is versioned; fields added after version 1
//! must deserialize with a default so older logs stay readable.

pub mod replay;

pub use replay::ReplayPlan;

use crate::common::{EngineError, EngineResult};
use crate::context::{ConsumerMode, RunContext};
use crate::model::{ItemIdentity, ItemResult, Outcome, WorkItem, WorkKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Record layout version written by this build.
pub const RECORD_VERSION: u32 = 1;

pub const SUCCESS_EXTENSION: &str = "success";
pub const ERROR_EXTENSION: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Success,
    Failure,
}

/// One line of a success or error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub task: String,
    pub consumer: ConsumerMode,
    pub kind: WorkKind,
    pub identity: ItemIdentity,
    pub outcome: RecordOutcome,
    /// Error text of a failed item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Remote response of a successful item.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
    /// Request body, enough to rebuild the work item.
    pub payload: Value,
    /// SHA-256 of `payload` at the time it was dispatched.
    pub fingerprint: String,
}

impl OperationRecord {
    pub fn new(run_id: &str, task: &str, consumer: ConsumerMode, result: &ItemResult) -> Self {
        let (outcome, message, detail) = match &result.outcome {
            Outcome::Success { detail } => (RecordOutcome::Success, None, detail.clone()),
            Outcome::Failure { error } => (RecordOutcome::Failure, Some(error.clone()), Value::Null),
        };

        Self {
            version: RECORD_VERSION,
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            task: task.to_string(),
            consumer,
            kind: result.item.kind(),
            identity: result.item.identity().clone(),
            outcome,
            message,
            detail,
            payload: result.item.payload().clone(),
            fingerprint: result.item.fingerprint(),
        }
    }

    /// Parse one log line.
    ///
    /// # Errors
    ///
    /// [`EngineError::MalformedState`] for invalid JSON, missing fields or a
    /// record written by a newer layout version.
    pub fn parse_line(line: &str, origin: &str) -> EngineResult<Self> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| EngineError::malformed(origin, e.to_string()))?;

        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| EngineError::malformed(origin, "record has no version"))?;
        if version > u64::from(RECORD_VERSION) {
            return Err(EngineError::malformed(
                origin,
                format!("record version {version} is newer than supported version {RECORD_VERSION}"),
            ));
        }

        serde_json::from_value(value).map_err(|e| EngineError::malformed(origin, e.to_string()))
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == RecordOutcome::Failure
    }

    /// Rebuild the work item this record was written for.
    pub fn to_work_item(&self) -> WorkItem {
        WorkItem::new(self.identity.clone(), self.kind, self.payload.clone())
    }
}

/// Paths of the two logs of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogPaths {
    pub success: PathBuf,
    pub error: PathBuf,
}

impl RunLogPaths {
    pub fn new(dir: &Path, run_id: &str, task: &str, mode: ConsumerMode) -> Self {
        let stem = format!("{run_id}.{task}.{mode}");
        Self {
            success: dir.join(format!("{stem}.{SUCCESS_EXTENSION}")),
            error: dir.join(format!("{stem}.{ERROR_EXTENSION}")),
        }
    }
}

impl fmt::Display for RunLogPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "success log: {}\nerror log:   {}",
            self.success.display(),
            self.error.display()
        )
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSummary {
    pub paths: RunLogPaths,
    pub successes: u64,
    pub failures: u64,
    /// Records that could not be written.
    pub write_failures: u64,
}

struct LogFiles {
    success: Option<File>,
    error: Option<File>,
}

/// Appends one record per result to the success or error log of a run.
///
/// Both files are created when the logger is. Failing to create or write a
/// file is reported on the log and stderr and counted; processing goes on.
pub struct OperationLogger {
    run_id: String,
    task: String,
    mode: ConsumerMode,
    paths: RunLogPaths,
    files: Mutex<LogFiles>,
    successes: AtomicU64,
    failures: AtomicU64,
    write_failures: AtomicU64,
}

impl OperationLogger {
    pub fn create(ctx: &RunContext, mode: ConsumerMode) -> Self {
        let paths = RunLogPaths::new(ctx.log_dir(), ctx.run_id(), ctx.task(), mode);
        let write_failures = AtomicU64::new(0);

        if let Err(e) = fs::create_dir_all(ctx.log_dir()) {
            report_write_failure(&format!(
                "cannot create log directory {}: {e}",
                ctx.log_dir().display()
            ));
        }

        let open = |path: &Path| match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                report_write_failure(&format!("cannot open {}: {e}", path.display()));
                write_failures.fetch_add(1, Ordering::Relaxed);
                None
            }
        };
        let files = LogFiles {
            success: open(&paths.success),
            error: open(&paths.error),
        };

        log::info!("Recording results of run {} to {}", ctx.run_id(), paths.error.display());

        Self {
            run_id: ctx.run_id().to_string(),
            task: ctx.task().to_string(),
            mode,
            paths,
            files: Mutex::new(files),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            write_failures,
        }
    }

    pub fn paths(&self) -> &RunLogPaths {
        &self.paths
    }

    pub fn mode(&self) -> ConsumerMode {
        self.mode
    }

    /// Append `result` to the log matching its outcome.
    pub fn record(&self, result: &ItemResult) {
        let record = OperationRecord::new(&self.run_id, &self.task, self.mode, result);
        if record.is_failure() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        } else {
            self.successes.fetch_add(1, Ordering::Relaxed);
        }

        if let Err(reason) = self.append(&record) {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            report_write_failure(&format!(
                "failed to record {} {}: {reason}",
                record.kind, record.identity
            ));
        }
    }

    pub fn record_all(&self, results: &[ItemResult]) {
        for result in results {
            self.record(result);
        }
    }

    fn append(&self, record: &OperationRecord) -> Result<(), String> {
        let mut line = serde_json::to_string(record).map_err(|e| e.to_string())?;
        line.push('\n');

        let mut files = self.files.lock().map_err(|_| "log file lock poisoned".to_string())?;
        let (file, path) = if record.is_failure() {
            (files.error.as_mut(), &self.paths.error)
        } else {
            (files.success.as_mut(), &self.paths.success)
        };
        let file = file.ok_or_else(|| format!("{} is not open", path.display()))?;
        file.write_all(line.as_bytes()).map_err(|e| e.to_string())
    }

    pub fn summary(&self) -> LogSummary {
        LogSummary {
            paths: self.paths.clone(),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

fn report_write_failure(message: &str) {
    log::error!("Operation log: {message}");
    eprintln!("warning: operation log: {message}");
}
