//! Work items and their results.
//!
//! A [`WorkItem`] is one unit of remote work. It is created once, from a
//! fetched page or from a replayed log record, and never mutated afterwards.
//! Everything downstream (executor, consumers, logger, replayer) reports back
//! with exactly one [`ItemResult`] per item.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// What a work item asks the remote to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    /// Materialise an already fetched resource locally (export).
    Fetch,
    Publish,
    Unpublish,
    Update,
}

impl WorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::Fetch => "fetch",
            WorkKind::Publish => "publish",
            WorkKind::Unpublish => "unpublish",
            WorkKind::Update => "update",
        }
    }

    /// Kinds that mutate remote state and can be re-dispatched from an error log.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, WorkKind::Fetch)
    }
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a work item.
///
/// Entities are addressed by module, uid and optional locale. Pages of a scan
/// are addressed by their scope and skip offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemIdentity {
    Entity {
        module: String,
        uid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locale: Option<String>,
    },
    Page {
        scope: String,
        skip: u64,
    },
}

impl ItemIdentity {
    pub fn entity(module: impl Into<String>, uid: impl Into<String>, locale: Option<String>) -> Self {
        ItemIdentity::Entity {
            module: module.into(),
            uid: uid.into(),
            locale,
        }
    }

    pub fn page(scope: impl Into<String>, skip: u64) -> Self {
        ItemIdentity::Page {
            scope: scope.into(),
            skip,
        }
    }

    /// Composite key used to map bulk responses back to their items.
    ///
    /// Format: `module:uid[:locale]` for entities, `scope@skip` for pages.
    pub fn key(&self) -> String {
        match self {
            ItemIdentity::Entity {
                module,
                uid,
                locale: Some(locale),
            } => format!("{module}:{uid}:{locale}"),
            ItemIdentity::Entity {
                module,
                uid,
                locale: None,
            } => format!("{module}:{uid}"),
            ItemIdentity::Page { scope, skip } => format!("{scope}@{skip}"),
        }
    }

    pub fn uid(&self) -> Option<&str> {
        match self {
            ItemIdentity::Entity { uid, .. } => Some(uid),
            ItemIdentity::Page { .. } => None,
        }
    }

    pub fn module(&self) -> Option<&str> {
        match self {
            ItemIdentity::Entity { module, .. } => Some(module),
            ItemIdentity::Page { .. } => None,
        }
    }

    pub fn locale(&self) -> Option<&str> {
        match self {
            ItemIdentity::Entity { locale, .. } => locale.as_deref(),
            ItemIdentity::Page { .. } => None,
        }
    }
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// One unit of remote work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    identity: ItemIdentity,
    kind: WorkKind,
    payload: Value,
}

impl WorkItem {
    pub fn new(identity: ItemIdentity, kind: WorkKind, payload: Value) -> Self {
        Self {
            identity,
            kind,
            payload,
        }
    }

    pub fn identity(&self) -> &ItemIdentity {
        &self.identity
    }

    pub fn kind(&self) -> WorkKind {
        self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn key(&self) -> String {
        self.identity.key()
    }

    /// SHA-256 of the payload's JSON text, hex encoded.
    ///
    /// `serde_json` keeps object keys sorted unless `preserve_order` is
    /// enabled, so equal payloads produce equal fingerprints.
    pub fn fingerprint(&self) -> String {
        let canonical = self.payload.to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// An ordered, bounded group of work items processed and rate limited together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    number: u64,
    items: Vec<WorkItem>,
}

impl Batch {
    pub fn new(number: u64, items: Vec<WorkItem>) -> Self {
        Self { number, items }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<WorkItem> {
        self.items
    }
}

/// Outcome of processing a single work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        #[serde(default)]
        detail: Value,
    },
    Failure {
        error: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// One result per work item, as produced by executors and consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub item: WorkItem,
    pub outcome: Outcome,
}

impl ItemResult {
    pub fn success(item: WorkItem, detail: Value) -> Self {
        Self {
            item,
            outcome: Outcome::Success { detail },
        }
    }

    pub fn failure(item: WorkItem, error: impl Into<String>) -> Self {
        Self {
            item,
            outcome: Outcome::Failure {
                error: error.into(),
            },
        }
    }

    pub fn from_result<E: fmt::Display>(item: WorkItem, result: Result<Value, E>) -> Self {
        match result {
            Ok(detail) => Self::success(item, detail),
            Err(e) => Self::failure(item, e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}
