use super::{ERROR_EXTENSION, OperationRecord};
use crate::common::{EngineError, EngineResult};
use crate::context::{ConsumerMode, RunContext};
use crate::model::{ItemIdentity, WorkItem, WorkKind};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Suffix appended to the task name of a replay run.
pub const RETRY_SUFFIX: &str = "-retry";

/// Work items rebuilt from an error log, ready to be dispatched again.
#[derive(Debug, Clone)]
pub struct ReplayPlan {
    source: PathBuf,
    task: String,
    mode: ConsumerMode,
    items: Vec<WorkItem>,
    skipped: usize,
}

/// Task and consumer mode encoded in `<run_id>.<task>.<mode>.error`.
fn parse_file_name(path: &Path) -> (Option<String>, Option<ConsumerMode>) {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return (None, None);
    };
    let parts: Vec<&str> = name.split('.').collect();
    match parts.as_slice() {
        [_run_id, task, mode, _ext] => (Some((*task).to_string()), mode.parse().ok()),
        _ => (None, None),
    }
}

impl ReplayPlan {
    /// Read `path` and rebuild every failed item it records.
    ///
    /// Lines that do not parse, successful records and page identities are
    /// skipped with a warning. When an item failed more than once, the last
    /// record wins.
    ///
    /// # Errors
    ///
    /// - [`EngineError::FatalConfig`] if `path` is not an error log, or the
    ///   task or consumer mode cannot be determined
    /// - [`EngineError::Io`] if the file cannot be read
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if path.extension().and_then(|e| e.to_str()) != Some(ERROR_EXTENSION) {
            return Err(EngineError::FatalConfig(format!(
                "{} is not an error log; only '.{ERROR_EXTENSION}' files can be replayed",
                path.display()
            )));
        }

        let text = fs::read_to_string(path)
            .map_err(|e| EngineError::io(format!("reading {}", path.display()), e))?;
        let (name_task, name_mode) = parse_file_name(path);

        let mut task: Option<String> = None;
        let mut mode: Option<ConsumerMode> = None;
        let mut items: Vec<WorkItem> = Vec::new();
        let mut positions: HashMap<(String, WorkKind), usize> = HashMap::new();
        let mut skipped = 0;

        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let origin = format!("{}:{}", path.display(), index + 1);

            let record = match OperationRecord::parse_line(line, &origin) {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("Skipping unreadable record: {e}");
                    skipped += 1;
                    continue;
                }
            };

            if !record.is_failure() {
                log::warn!("Skipping {origin}: record is not a failure");
                skipped += 1;
                continue;
            }
            if matches!(record.identity, ItemIdentity::Page { .. }) {
                log::warn!("Skipping {origin}: page {} cannot be replayed", record.identity);
                skipped += 1;
                continue;
            }

            match &task {
                None => task = Some(record.task.clone()),
                Some(first) if *first != record.task => log::warn!(
                    "{origin} belongs to task '{}', replaying under '{first}'",
                    record.task
                ),
                Some(_) => {}
            }
            if mode.is_none() {
                mode = Some(record.consumer);
            }

            let item = record.to_work_item();
            if item.fingerprint() != record.fingerprint {
                log::warn!("{origin}: payload of {} does not match its fingerprint", item.identity());
            }

            let key = (item.key(), item.kind());
            match positions.get(&key) {
                Some(&position) => {
                    log::debug!("{origin}: {} failed again, keeping the latest record", item.identity());
                    items[position] = item;
                }
                None => {
                    positions.insert(key, items.len());
                    items.push(item);
                }
            }
        }

        let task = task.or(name_task).ok_or_else(|| {
            EngineError::FatalConfig(format!(
                "cannot determine the task of {}",
                path.display()
            ))
        })?;
        let mode = mode.or(name_mode).ok_or_else(|| {
            EngineError::FatalConfig(format!(
                "cannot determine the consumer mode of {}",
                path.display()
            ))
        })?;

        log::info!(
            "Loaded {} failed items of task '{}' ({} consumer) from {}, {} lines skipped",
            items.len(),
            task,
            mode,
            path.display(),
            skipped
        );

        Ok(Self {
            source: path.to_path_buf(),
            task,
            mode,
            items,
            skipped,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Task of the run that wrote the log.
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Task name the replay run logs under.
    ///
    /// Replaying a replay log keeps the name instead of stacking suffixes.
    pub fn retry_task(&self) -> String {
        if self.task.ends_with(RETRY_SUFFIX) {
            self.task.clone()
        } else {
            format!("{}{RETRY_SUFFIX}", self.task)
        }
    }

    /// Rename `ctx` for the replay run and switch it to the original mode.
    pub fn retry_context(&self, ctx: RunContext) -> RunContext {
        ctx.with_task(self.retry_task()).with_consumer_mode(self.mode)
    }

    /// Consumer mode the original run used.
    pub fn mode(&self) -> ConsumerMode {
        self.mode
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<WorkItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Lines that were not turned into work items.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
