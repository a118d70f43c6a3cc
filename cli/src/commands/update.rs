use crate::cli::UpdateArgs;
use crate::error::{AppError, AppResult};
use engine::bulk_operations::BulkEngine;
use engine::common::EngineResult;
use engine::consumer::consumer_for;
use engine::context::ConsumerMode;
use engine::model::{WorkItem, WorkKind};
use engine::stack_api::{ListQuery, StackApi, UpdatePatch};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Read the JSON object merged into every entry.
pub fn load_patch(path: &Path) -> AppResult<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("reading patch {}", path.display()), e))?;
    let patch: Value = serde_json::from_str(&text)
        .map_err(|e| AppError::Config(format!("{} is not valid JSON: {e}", path.display())))?;

    match &patch {
        Value::Object(fields) if !fields.is_empty() => Ok(patch),
        Value::Object(_) => Err(AppError::Config(format!(
            "{} is an empty object; nothing to update",
            path.display()
        ))),
        _ => Err(AppError::Config(format!(
            "{} must contain a JSON object of entry fields",
            path.display()
        ))),
    }
}

/// Apply `patch` to every entry of the content type, one request per entry.
///
/// The stack has no bulk update endpoint, so the single consumer is used
/// whatever the configured mode is.
pub async fn run(
    engine: &mut BulkEngine,
    api: Arc<dyn StackApi>,
    args: &UpdateArgs,
    patch: Value,
) -> EngineResult<()> {
    let consumer = consumer_for(ConsumerMode::Single, api, engine.context());
    let query = ListQuery::entries(&args.content_type).with_locale(args.locale.clone());

    engine
        .dispatch_scan(&query, |resource| update_item(&query, &patch, resource), consumer)
        .await?;
    Ok(())
}

pub fn update_item(query: &ListQuery, patch: &Value, resource: Value) -> Option<WorkItem> {
    let identity = query.identity_of(&resource)?;
    let payload = UpdatePatch {
        content_type: query.content_type.clone()?,
        entry: patch.clone(),
    };
    Some(WorkItem::new(identity, WorkKind::Update, serde_json::to_value(payload).ok()?))
}
