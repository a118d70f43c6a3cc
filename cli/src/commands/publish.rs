use super::resolve_content_types;
use crate::cli::PublishArgs;
use crate::error::{AppError, AppResult};
use engine::bulk_operations::BulkEngine;
use engine::common::EngineResult;
use engine::consumer::consumer_for;
use engine::model::{WorkItem, WorkKind};
use engine::stack_api::{ListQuery, ModuleKind, PublishTarget, StackApi};
use serde_json::Value;
use std::sync::Arc;

/// Reject modules that cannot be published before anything is listed.
pub fn check(args: &PublishArgs) -> AppResult<()> {
    if let Some(module) = args.modules().into_iter().find(|m| !m.is_publishable()) {
        return Err(AppError::Config(format!(
            "{module} cannot be published; use --module entries or --module assets"
        )));
    }
    Ok(())
}

/// Publish or unpublish every entry of the selected content types, per
/// locale, and then every asset.
pub async fn run(
    engine: &mut BulkEngine,
    api: Arc<dyn StackApi>,
    kind: WorkKind,
    args: &PublishArgs,
) -> EngineResult<()> {
    let consumer = consumer_for(engine.context().consumer_mode(), api.clone(), engine.context());

    for module in args.modules() {
        match module {
            ModuleKind::Entries => {
                let content_types =
                    resolve_content_types(engine, &args.content_types).await?;
                for ct in &content_types {
                    for locale in &args.locales {
                        if engine.is_interrupted() {
                            return Ok(());
                        }
                        let query = ListQuery::entries(ct).with_locale(Some(locale.clone()));
                        let locales = [locale.clone()];
                        engine
                            .dispatch_scan(
                                &query,
                                |resource| publish_item(&query, kind, &args.environments, &locales, resource),
                                consumer.clone(),
                            )
                            .await?;
                    }
                }
            }
            _ => {
                if engine.is_interrupted() {
                    return Ok(());
                }
                let query = ListQuery::new(module);
                engine
                    .dispatch_scan(
                        &query,
                        |resource| {
                            publish_item(&query, kind, &args.environments, &args.locales, resource)
                        },
                        consumer.clone(),
                    )
                    .await?;
            }
        }
    }
    Ok(())
}

/// Work item publishing `resource` at its current version.
pub fn publish_item(
    query: &ListQuery,
    kind: WorkKind,
    environments: &[String],
    locales: &[String],
    resource: Value,
) -> Option<WorkItem> {
    let identity = query.identity_of(&resource)?;
    let target = PublishTarget {
        content_type: query.content_type.clone(),
        environments: environments.to_vec(),
        locales: locales.to_vec(),
        version: resource.get("_version").and_then(Value::as_u64),
    };
    let payload = serde_json::to_value(target).ok()?;
    Some(WorkItem::new(identity, kind, payload))
}
