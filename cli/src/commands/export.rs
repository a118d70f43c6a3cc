//! `stackshift export`: write stack modules to a directory.
//!
//! Layout under the target directory:
//!
//! - `<module>/<uid>.json` for content types, global fields, environments,
//!   locales and asset metadata
//! - `entries/<content type>[/<locale>]/<uid>.json` for entries
//! - `assets/files/<uid>/<file name>` for asset binaries

use super::resolve_content_types;
use crate::cli::ExportArgs;
use async_trait::async_trait;
use engine::bulk_operations::{BulkEngine, ScanSummary};
use engine::common::EngineResult;
use engine::consumer::Consumer;
use engine::context::ConsumerMode;
use engine::model::{Batch, ItemIdentity, ItemResult, WorkItem, WorkKind};
use engine::stack_api::{ListQuery, ModuleKind, StackApi, StackApiError};
use futures::stream::{self, StreamExt};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Field added to exported entries naming their content type.
pub const CONTENT_TYPE_FIELD: &str = "_content_type_uid";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{0} does not address a stack resource")]
    NotAnEntity(String),

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {0}: {1}")]
    Encode(String, serde_json::Error),

    #[error("asset download failed: {0}")]
    Download(#[from] StackApiError),
}

/// Writes fetched resources to the export directory.
pub struct Exporter {
    api: Arc<dyn StackApi>,
    dir: PathBuf,
}

impl Exporter {
    pub fn new(api: Arc<dyn StackApi>, dir: impl Into<PathBuf>) -> Self {
        Self {
            api,
            dir: dir.into(),
        }
    }

    /// Where the JSON of `item` is written.
    pub fn path_for(&self, item: &WorkItem) -> Result<PathBuf, ExportError> {
        let identity = item.identity();
        let (Some(module), Some(uid)) = (identity.module(), identity.uid()) else {
            return Err(ExportError::NotAnEntity(identity.to_string()));
        };

        let mut path = self.dir.join(module);
        if module == ModuleKind::Entries.as_str() {
            if let Some(ct) = item.payload().get(CONTENT_TYPE_FIELD).and_then(Value::as_str) {
                path.push(safe_segment(ct));
            }
            if let Some(locale) = identity.locale() {
                path.push(safe_segment(locale));
            }
        }
        path.push(format!("{}.json", safe_segment(uid)));
        Ok(path)
    }

    /// Write `item` to disk, downloading the file of an asset.
    pub async fn materialize(&self, item: &WorkItem) -> Result<Value, ExportError> {
        let path = self.path_for(item)?;
        let json = serde_json::to_vec_pretty(item.payload())
            .map_err(|e| ExportError::Encode(item.key(), e))?;
        write_file(&path, &json).await?;

        let mut detail = json!({ "path": path.display().to_string() });
        if item.identity().module() == Some(ModuleKind::Assets.as_str()) {
            if let Some(file) = self.download_asset(item).await? {
                detail["file"] = json!(file.display().to_string());
            }
        }
        Ok(detail)
    }

    async fn download_asset(&self, item: &WorkItem) -> Result<Option<PathBuf>, ExportError> {
        let Some(url) = item.payload().get("url").and_then(Value::as_str) else {
            log::warn!("Asset {} has no url, only its metadata is exported", item.identity());
            return Ok(None);
        };
        let uid = item.identity().uid().unwrap_or_default();
        let file_name = item
            .payload()
            .get("filename")
            .and_then(Value::as_str)
            .map(safe_segment)
            .unwrap_or_else(|| safe_segment(uid));

        let bytes = self.api.download(url).await?;
        let path = self
            .dir
            .join(ModuleKind::Assets.as_str())
            .join("files")
            .join(safe_segment(uid))
            .join(file_name);
        write_file(&path, &bytes).await?;
        log::debug!("Downloaded {} bytes to {}", bytes.len(), path.display());
        Ok(Some(path))
    }
}

/// Re-exports items from an error log, one at a time.
pub struct ExportConsumer {
    exporter: Exporter,
    concurrency: usize,
}

impl ExportConsumer {
    pub fn new(exporter: Exporter, concurrency: usize) -> Self {
        Self {
            exporter,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl Consumer for ExportConsumer {
    fn mode(&self) -> ConsumerMode {
        ConsumerMode::Single
    }

    async fn apply(&self, batch: Batch) -> Vec<ItemResult> {
        stream::iter(batch.into_items())
            .map(|item| async move {
                let result = self.exporter.materialize(&item).await;
                ItemResult::from_result(item, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}

/// Export the selected modules in order. Stops early on shutdown.
pub async fn run(
    engine: &mut BulkEngine,
    api: Arc<dyn StackApi>,
    args: &ExportArgs,
) -> EngineResult<()> {
    let exporter = Exporter::new(api.clone(), &args.dir);
    let locales: Vec<Option<String>> = if args.locales.is_empty() {
        vec![None]
    } else {
        args.locales.iter().cloned().map(Some).collect()
    };

    for module in args.modules() {
        if engine.is_interrupted() {
            break;
        }
        if module != ModuleKind::Entries {
            export_scan(engine, &exporter, &ListQuery::new(module)).await?;
            continue;
        }

        let content_types = resolve_content_types(engine, &args.content_types).await?;
        for ct in &content_types {
            for locale in &locales {
                if engine.is_interrupted() {
                    return Ok(());
                }
                let query = ListQuery::entries(ct).with_locale(locale.clone());
                export_scan(engine, &exporter, &query).await?;
            }
        }
    }
    Ok(())
}

async fn export_scan(
    engine: &mut BulkEngine,
    exporter: &Exporter,
    query: &ListQuery,
) -> EngineResult<ScanSummary> {
    let summary = engine
        .process_scan(
            query,
            |resource| fetch_item(query, resource),
            |item| async move { exporter.materialize(&item).await },
        )
        .await?;
    log::info!(
        "Exported {} {} in {} pages",
        summary.items,
        query.scope(),
        summary.pages
    );
    Ok(summary)
}

/// Work item for a listed resource; entries are tagged with their content type.
pub fn fetch_item(query: &ListQuery, mut resource: Value) -> Option<WorkItem> {
    let identity: ItemIdentity = query.identity_of(&resource)?;
    if let (Some(ct), Some(fields)) = (&query.content_type, resource.as_object_mut()) {
        fields
            .entry(CONTENT_TYPE_FIELD)
            .or_insert_with(|| Value::String(ct.clone()));
    }
    Some(WorkItem::new(identity, WorkKind::Fetch, resource))
}

/// A single path segment: separators and parent references are replaced.
fn safe_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), ExportError> {
    let write_error = |source| ExportError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
    }
    tokio::fs::write(path, contents).await.map_err(write_error)
}
