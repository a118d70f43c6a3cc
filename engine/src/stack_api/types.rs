use crate::model::{ItemIdentity, WorkItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Top-level collections of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    ContentTypes,
    GlobalFields,
    Entries,
    Assets,
    Environments,
    Locales,
}

impl ModuleKind {
    /// Export order: schemas first, then entries, then assets.
    pub const ALL: [ModuleKind; 6] = [
        ModuleKind::Locales,
        ModuleKind::Environments,
        ModuleKind::GlobalFields,
        ModuleKind::ContentTypes,
        ModuleKind::Entries,
        ModuleKind::Assets,
    ];

    /// Path segment and response collection key for this module.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::ContentTypes => "content_types",
            ModuleKind::GlobalFields => "global_fields",
            ModuleKind::Entries => "entries",
            ModuleKind::Assets => "assets",
            ModuleKind::Environments => "environments",
            ModuleKind::Locales => "locales",
        }
    }

    /// Modules whose items can be published to environments.
    pub fn is_publishable(&self) -> bool {
        matches!(self, ModuleKind::Entries | ModuleKind::Assets)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "content_types" => Ok(ModuleKind::ContentTypes),
            "global_fields" => Ok(ModuleKind::GlobalFields),
            "entries" => Ok(ModuleKind::Entries),
            "assets" => Ok(ModuleKind::Assets),
            "environments" => Ok(ModuleKind::Environments),
            "locales" => Ok(ModuleKind::Locales),
            other => Err(format!("unknown module '{other}'")),
        }
    }
}

/// Parameters of a paginated list call.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub module: ModuleKind,
    pub content_type: Option<String>,
    pub locale: Option<String>,
    /// Remote query filter, passed through as JSON.
    pub filter: Option<Value>,
}

impl ListQuery {
    pub fn new(module: ModuleKind) -> Self {
        Self {
            module,
            content_type: None,
            locale: None,
            filter: None,
        }
    }

    pub fn entries(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Self::new(ModuleKind::Entries)
        }
    }

    pub fn with_locale(mut self, locale: Option<String>) -> Self {
        self.locale = locale;
        self
    }

    pub fn with_filter(mut self, filter: Option<Value>) -> Self {
        self.filter = filter;
        self
    }

    /// Stable name of the scan, used for checkpoints and page identities.
    ///
    /// For example `assets`, `entries/blog_post` or `entries/blog_post/fr-fr`.
    pub fn scope(&self) -> String {
        let mut scope = self.module.as_str().to_string();
        if let Some(ct) = &self.content_type {
            scope.push('/');
            scope.push_str(ct);
        }
        if let Some(locale) = &self.locale {
            scope.push('/');
            scope.push_str(locale);
        }
        scope
    }

    /// Identity of a resource returned by this query.
    ///
    /// The locale is the query's, falling back to the resource's own
    /// `locale` field. Resources without a string `uid` have no identity.
    pub fn identity_of(&self, resource: &Value) -> Option<ItemIdentity> {
        let uid = resource.get("uid").and_then(Value::as_str)?;
        let locale = self.locale.clone().or_else(|| {
            resource
                .get("locale")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        Some(ItemIdentity::entity(self.module.as_str(), uid, locale))
    }
}

/// One page of a remote collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub count: Option<u64>,
}

/// Publish/unpublish request body carried in a work item's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub environments: Vec<String>,
    pub locales: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl PublishTarget {
    /// Read the target carried in `item`'s payload, if it holds one.
    pub fn of(item: &WorkItem) -> Option<Self> {
        serde_json::from_value(item.payload().clone()).ok()
    }

    /// Environments and locales reached, sorted and without duplicates.
    ///
    /// Items share a bulk request only when these are equal.
    pub fn destinations(&self) -> (Vec<String>, Vec<String>) {
        let sorted = |values: &[String]| {
            let mut values = values.to_vec();
            values.sort();
            values.dedup();
            values
        };
        (sorted(&self.environments), sorted(&self.locales))
    }
}

/// Update request body carried in a work item's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePatch {
    pub content_type: String,
    /// Fields merged into the entry.
    pub entry: Value,
}

/// Per-item outcomes of a bulk request, keyed by [`WorkItem::key`].
#[derive(Debug, Clone, Default)]
pub struct BulkResponse {
    outcomes: HashMap<String, Result<Value, String>>,
}

impl BulkResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the same outcome for every item of one request.
    pub fn insert_all<'a>(
        &mut self,
        items: impl IntoIterator<Item = &'a WorkItem>,
        outcome: Result<Value, String>,
    ) {
        for item in items {
            self.outcomes.insert(item.key(), outcome.clone());
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, outcome: Result<Value, String>) {
        self.outcomes.insert(key.into(), outcome);
    }

    /// Removes and returns the outcome recorded for `key`.
    pub fn take(&mut self, key: &str) -> Option<Result<Value, String>> {
        self.outcomes.remove(key)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
