use super::cursor::SyncCursor;
use crate::common::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Current layout version of the checkpoint file.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Persistence for per-scope cursor snapshots.
///
/// The engine saves a snapshot after every completed page and reads it back
/// once when a run is resumed.
pub trait CursorStore: Send + Sync {
    fn load(&self, scope: &str) -> EngineResult<Option<SyncCursor>>;
    fn save(&self, scope: &str, cursor: &SyncCursor) -> EngineResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    task: String,
    #[serde(default)]
    scans: BTreeMap<String, SyncCursor>,
}

/// JSON sidecar holding the cursors of every scan of one run.
///
/// The whole file is rewritten through a temporary file and a rename on each
/// save, so a crash leaves either the old or the new content behind.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    state: Mutex<CheckpointFile>,
}

impl FileCursorStore {
    /// Start an empty checkpoint for `task`. Nothing is written until the
    /// first save.
    pub fn create(path: impl Into<PathBuf>, task: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(CheckpointFile {
                version: CHECKPOINT_VERSION,
                task: task.into(),
                scans: BTreeMap::new(),
            }),
        }
    }

    /// Open an existing checkpoint written by an earlier run of `task`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Io`] if the file cannot be read
    /// - [`EngineError::MalformedState`] if it is not a checkpoint or was
    ///   written by a newer version
    /// - [`EngineError::FatalConfig`] if it belongs to another task
    pub fn open(path: impl Into<PathBuf>, task: &str) -> EngineResult<Self> {
        let path = path.into();
        let text = fs::read_to_string(&path).map_err(|e| {
            EngineError::io(format!("reading checkpoint {}", path.display()), e)
        })?;
        let file: CheckpointFile = serde_json::from_str(&text)
            .map_err(|e| EngineError::malformed(path.display().to_string(), e.to_string()))?;

        if file.version > CHECKPOINT_VERSION {
            return Err(EngineError::malformed(
                path.display().to_string(),
                format!(
                    "checkpoint version {} is newer than supported version {}",
                    file.version, CHECKPOINT_VERSION
                ),
            ));
        }
        if file.task != task {
            return Err(EngineError::FatalConfig(format!(
                "checkpoint {} belongs to task '{}', not '{}'",
                path.display(),
                file.task,
                task
            )));
        }

        log::info!(
            "Loaded checkpoint {} with {} scan(s)",
            path.display(),
            file.scans.len()
        );
        Ok(Self {
            path,
            state: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, file: &CheckpointFile) -> EngineResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    EngineError::io(format!("creating {}", parent.display()), e)
                })?;
            }
        }

        let json = serde_json::to_string_pretty(file)
            .map_err(|e| EngineError::malformed(self.path.display().to_string(), e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)
            .map_err(|e| EngineError::io(format!("writing {}", tmp.display()), e))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            EngineError::io(format!("replacing checkpoint {}", self.path.display()), e)
        })
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, scope: &str) -> EngineResult<Option<SyncCursor>> {
        let state = self
            .state
            .lock()
            .map_err(|_| EngineError::malformed(self.path.display().to_string(), "lock poisoned"))?;
        Ok(state.scans.get(scope).copied())
    }

    fn save(&self, scope: &str, cursor: &SyncCursor) -> EngineResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::malformed(self.path.display().to_string(), "lock poisoned"))?;
        state.scans.insert(scope.to_string(), *cursor);
        self.write(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_none, assert_ok};
    use tempfile::TempDir;

    fn cursor(skip: u64) -> SyncCursor {
        SyncCursor {
            last_skip: skip,
            last_batch_number: skip / 10,
            total_count: Some(100),
        }
    }

    #[test]
    fn test_saved_cursor_can_be_reopened() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.checkpoint.json");

        let store = FileCursorStore::create(&path, "publish-entries");
        assert_none!(store.load("entries/blog").unwrap());
        assert_ok!(store.save("entries/blog", &cursor(30)));
        assert_ok!(store.save("assets", &cursor(10)));
        assert_ok!(store.save("entries/blog", &cursor(40)));

        let reopened = FileCursorStore::open(&path, "publish-entries").unwrap();
        assert_eq!(reopened.load("entries/blog").unwrap(), Some(cursor(40)));
        assert_eq!(reopened.load("assets").unwrap(), Some(cursor(10)));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_checkpoint_of_other_task_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cp.json");
        FileCursorStore::create(&path, "export")
            .save("assets", &cursor(0))
            .unwrap();

        assert!(matches!(
            FileCursorStore::open(&path, "publish"),
            Err(EngineError::FatalConfig(_))
        ));
    }

    #[test]
    fn test_newer_version_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cp.json");
        fs::write(&path, r#"{"version": 2, "task": "export", "scans": {}}"#).unwrap();

        assert!(matches!(
            FileCursorStore::open(&path, "export"),
            Err(EngineError::MalformedState { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = FileCursorStore::open(dir.path().join("absent.json"), "export");
        assert!(matches!(result, Err(EngineError::Io { .. })));
    }
}
