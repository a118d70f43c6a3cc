use super::{
    BulkResponse, ListQuery, ModuleKind, Page, PublishTarget, StackApi, StackApiError, UpdatePatch,
};
use crate::common::{RateLimiter, RateLimiterConfig};
use crate::context::StackTarget;
use crate::model::{WorkItem, WorkKind};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

/// Backoff policy for transient failures of a single call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// HTTP client for a Contentstack-style v3 management API.
///
/// Every request waits on the shared [`RateLimiter`] first. Transient
/// failures (network errors, timeouts, 5xx and 429) are retried with
/// exponential backoff; a 429 waits at least as long as the advertised
/// `Retry-After`.
pub struct HttpStackApi {
    http: reqwest::Client,
    target: StackTarget,
    limiter: RateLimiter,
    retry: RetryPolicy,
    timeout: Duration,
}

impl HttpStackApi {
    pub fn new(
        target: StackTarget,
        limits: &RateLimiterConfig,
        timeout: Duration,
    ) -> Result<Self, StackApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StackApiError::ClientCreation {
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            target,
            limiter: limits.build(),
            retry: RetryPolicy::default(),
            timeout,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v3/{}", self.target.base_url(), path)
    }

    async fn request_json(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, StackApiError> {
        let bytes = self.execute(method, url, query, body, true).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| StackApiError::InvalidResponse {
            expected: "JSON body".to_string(),
            actual: e.to_string(),
        })
    }

    /// Send a request, retrying transient failures according to the policy.
    async fn execute(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<Vec<u8>, StackApiError> {
        let mut attempt = 0;
        loop {
            match self
                .execute_once(method.clone(), url, query, body, authenticated)
                .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let backoff = self.retry.delay_for(attempt);
                    let delay = match &e {
                        StackApiError::RateLimited {
                            retry_after_seconds,
                        } => backoff.max(Duration::from_secs(*retry_after_seconds)),
                        _ => backoff,
                    };
                    log::debug!(
                        "{} {} attempt {} failed, retrying in {:?}: {}",
                        method,
                        url,
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute_once(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<Vec<u8>, StackApiError> {
        self.limiter.until_ready().await;

        let mut builder = self.http.request(method, url).query(query);
        if authenticated {
            builder = builder
                .header("api_key", self.target.api_key())
                .header("authorization", self.target.management_token());
            if let Some(branch) = self.target.branch() {
                builder = builder.header("branch", branch);
            }
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_seconds = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(1);
            log::warn!("Rate limited on {url}, retry after {retry_after_seconds}s");
            return Err(StackApiError::RateLimited {
                retry_after_seconds,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        if !status.is_success() {
            return Err(StackApiError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(bytes.to_vec())
    }

    fn transport_error(&self, url: &str, error: reqwest::Error) -> StackApiError {
        if error.is_timeout() {
            StackApiError::Timeout {
                url: url.to_string(),
                seconds: self.timeout.as_secs(),
            }
        } else {
            StackApiError::RequestFailed {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }

    fn list_path(query: &ListQuery) -> Result<String, StackApiError> {
        match query.module {
            ModuleKind::Entries => {
                let ct = query.content_type.as_deref().ok_or_else(|| {
                    StackApiError::InvalidRequest(
                        "listing entries requires a content type".to_string(),
                    )
                })?;
                Ok(format!(
                    "content_types/{}/entries",
                    urlencoding::encode(ct)
                ))
            }
            other => Ok(other.as_str().to_string()),
        }
    }

    fn item_module(item: &WorkItem) -> Result<(ModuleKind, &str), StackApiError> {
        let identity = item.identity();
        let (Some(module), Some(uid)) = (identity.module(), identity.uid()) else {
            return Err(StackApiError::InvalidRequest(format!(
                "{identity} does not address an entity"
            )));
        };
        let module = module
            .parse::<ModuleKind>()
            .map_err(StackApiError::InvalidRequest)?;
        Ok((module, uid))
    }

    fn publish_target(item: &WorkItem) -> Result<PublishTarget, StackApiError> {
        serde_json::from_value(item.payload().clone()).map_err(|e| {
            StackApiError::InvalidRequest(format!("{}: invalid publish payload: {e}", item.key()))
        })
    }

    /// Split `items` into bulk requests, one per distinct set of
    /// environments and locales.
    ///
    /// Items that cannot be sent are answered in the returned response and
    /// left out of every request.
    fn plan_bulk<'a>(action: &str, items: &'a [WorkItem]) -> (Vec<BulkRequest<'a>>, BulkResponse) {
        let mut rejected = BulkResponse::new();
        let mut groups: BTreeMap<(Vec<String>, Vec<String>), Vec<(&'a WorkItem, ModuleKind, &'a str, PublishTarget)>> =
            BTreeMap::new();

        for item in items {
            let checked = Self::item_module(item).and_then(|(module, uid)| {
                if !module.is_publishable() {
                    return Err(StackApiError::Unsupported(format!("bulk {action} of {module}")));
                }
                Ok((module, uid, Self::publish_target(item)?))
            });
            match checked {
                Ok((module, uid, target)) => groups
                    .entry(target.destinations())
                    .or_default()
                    .push((item, module, uid, target)),
                Err(e) => {
                    log::warn!("Leaving {} out of bulk {}: {}", item.identity(), action, e);
                    rejected.insert(item.key(), Err(e.to_string()));
                }
            }
        }

        let requests = groups
            .into_iter()
            .map(|((environments, locales), members)| {
                let mut entries = Vec::new();
                let mut assets = Vec::new();
                for (item, module, uid, target) in &members {
                    match module {
                        ModuleKind::Entries => entries.push(json!({
                            "uid": uid,
                            "content_type": target.content_type,
                            "locale": item.identity().locale(),
                        })),
                        _ => assets.push(json!({ "uid": uid })),
                    }
                }
                BulkRequest {
                    body: json!({
                        "entries": entries,
                        "assets": assets,
                        "locales": locales,
                        "environments": environments,
                    }),
                    items: members.into_iter().map(|(item, ..)| item).collect(),
                }
            })
            .collect();

        (requests, rejected)
    }
}

/// One bulk request body and the items it carries.
struct BulkRequest<'a> {
    body: Value,
    items: Vec<&'a WorkItem>,
}

#[async_trait]
impl StackApi for HttpStackApi {
    async fn list(&self, query: &ListQuery, skip: u64, limit: u64) -> Result<Page, StackApiError> {
        let url = self.url(&Self::list_path(query)?);

        let mut params = vec![
            ("skip", skip.to_string()),
            ("limit", limit.to_string()),
            ("include_count", "true".to_string()),
        ];
        if let Some(locale) = &query.locale {
            params.push(("locale", locale.clone()));
        }
        if let Some(filter) = &query.filter {
            params.push(("query", filter.to_string()));
        }

        let body = self.request_json(Method::GET, &url, &params, None).await?;
        let key = query.module.as_str();
        let items = match body.get(key) {
            Some(Value::Array(items)) => items.clone(),
            _ => {
                return Err(StackApiError::InvalidResponse {
                    expected: format!("'{key}' array"),
                    actual: body.to_string().chars().take(200).collect(),
                });
            }
        };
        let count = body.get("count").and_then(Value::as_u64);

        log::debug!(
            "Listed {} {} at skip {} (count: {:?})",
            items.len(),
            query.scope(),
            skip,
            count
        );
        Ok(Page { items, count })
    }

    async fn apply(&self, item: &WorkItem) -> Result<Value, StackApiError> {
        let (module, uid) = Self::item_module(item)?;
        let uid = urlencoding::encode(uid);

        match (item.kind(), module) {
            (WorkKind::Publish | WorkKind::Unpublish, ModuleKind::Entries) => {
                let target = Self::publish_target(item)?;
                let ct = target.content_type.as_deref().ok_or_else(|| {
                    StackApiError::InvalidRequest(format!("{}: missing content type", item.key()))
                })?;
                let locale = item
                    .identity()
                    .locale()
                    .map(str::to_string)
                    .or_else(|| target.locales.first().cloned());
                let url = self.url(&format!(
                    "content_types/{}/entries/{}/{}",
                    urlencoding::encode(ct),
                    uid,
                    item.kind()
                ));
                let body = json!({
                    "entry": {
                        "environments": target.environments,
                        "locales": target.locales,
                    },
                    "locale": locale,
                    "version": target.version,
                });
                self.request_json(Method::POST, &url, &[], Some(&body)).await
            }
            (WorkKind::Publish | WorkKind::Unpublish, ModuleKind::Assets) => {
                let target = Self::publish_target(item)?;
                let url = self.url(&format!("assets/{}/{}", uid, item.kind()));
                let body = json!({
                    "asset": {
                        "environments": target.environments,
                        "locales": target.locales,
                    },
                    "version": target.version,
                });
                self.request_json(Method::POST, &url, &[], Some(&body)).await
            }
            (WorkKind::Update, ModuleKind::Entries) => {
                let patch: UpdatePatch =
                    serde_json::from_value(item.payload().clone()).map_err(|e| {
                        StackApiError::InvalidRequest(format!(
                            "{}: invalid update payload: {e}",
                            item.key()
                        ))
                    })?;
                let url = self.url(&format!(
                    "content_types/{}/entries/{}",
                    urlencoding::encode(&patch.content_type),
                    uid
                ));
                let params: Vec<(&str, String)> = item
                    .identity()
                    .locale()
                    .map(|l| vec![("locale", l.to_string())])
                    .unwrap_or_default();
                let body = json!({ "entry": patch.entry });
                self.request_json(Method::PUT, &url, &params, Some(&body))
                    .await
            }
            (kind, module) => Err(StackApiError::Unsupported(format!("{kind} of {module}"))),
        }
    }

    async fn bulk(&self, kind: WorkKind, items: &[WorkItem]) -> Result<BulkResponse, StackApiError> {
        let action = match kind {
            WorkKind::Publish | WorkKind::Unpublish => kind.as_str(),
            other => return Err(StackApiError::Unsupported(format!("bulk {other}"))),
        };

        let (requests, mut response) = Self::plan_bulk(action, items);
        let url = self.url(&format!("bulk/{action}"));

        for request in requests {
            match self
                .request_json(Method::POST, &url, &[], Some(&request.body))
                .await
            {
                Ok(detail) => {
                    log::info!("Bulk {} accepted for {} items", action, request.items.len());
                    response.insert_all(request.items, Ok(detail));
                }
                Err(e) => {
                    log::error!("Bulk {} of {} items failed: {}", action, request.items.len(), e);
                    response.insert_all(request.items, Err(e.to_string()));
                }
            }
        }
        Ok(response)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, StackApiError> {
        self.execute(Method::GET, url, &[], None, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemIdentity;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_list_path_for_entries_requires_content_type() {
        assert!(matches!(
            HttpStackApi::list_path(&ListQuery::new(ModuleKind::Entries)),
            Err(StackApiError::InvalidRequest(_))
        ));
        assert_eq!(
            HttpStackApi::list_path(&ListQuery::entries("blog post")).unwrap(),
            "content_types/blog%20post/entries"
        );
        assert_eq!(
            HttpStackApi::list_path(&ListQuery::new(ModuleKind::GlobalFields)).unwrap(),
            "global_fields"
        );
    }

    #[test]
    fn test_page_items_cannot_be_applied() {
        let item = WorkItem::new(
            ItemIdentity::page("assets", 0),
            WorkKind::Publish,
            Value::Null,
        );
        assert!(matches!(
            HttpStackApi::item_module(&item),
            Err(StackApiError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_client_creation() {
        let target = StackTarget::new("https://api.example.test", "key", "token", None);
        let api = HttpStackApi::new(target, &RateLimiterConfig::default(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(
            api.url("content_types"),
            "https://api.example.test/v3/content_types"
        );
    }

    fn publish(uid: &str, locale: &str, payload: Value) -> WorkItem {
        WorkItem::new(
            ItemIdentity::entity("entries", uid, Some(locale.into())),
            WorkKind::Publish,
            payload,
        )
    }

    fn target(locale: &str) -> Value {
        json!({"content_type": "blog_post", "environments": ["production"], "locales": [locale]})
    }

    #[test]
    fn test_bulk_requests_are_split_by_locale() {
        let items = vec![
            publish("a", "en-us", target("en-us")),
            publish("b", "fr-fr", target("fr-fr")),
            publish("c", "en-us", target("en-us")),
        ];

        let (requests, rejected) = HttpStackApi::plan_bulk("publish", &items);

        assert!(rejected.is_empty());
        assert_eq!(requests.len(), 2);
        for request in &requests {
            let locales = request.body["locales"].clone();
            assert_eq!(locales.as_array().map(Vec::len), Some(1));
            for entry in request.body["entries"].as_array().unwrap() {
                assert_eq!(Value::Array(vec![entry["locale"].clone()]), locales);
            }
        }
        let sizes: Vec<usize> = requests.iter().map(|r| r.items.len()).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[test]
    fn test_malformed_item_is_left_out_of_bulk_request() {
        let items = vec![
            publish("a", "en-us", target("en-us")),
            publish("bad", "en-us", json!({"environments": "not-a-list"})),
            WorkItem::new(
                ItemIdentity::entity("locales", "l1", None),
                WorkKind::Publish,
                target("en-us"),
            ),
        ];

        let (requests, mut rejected) = HttpStackApi::plan_bulk("publish", &items);

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].items.len(), 1);
        assert_eq!(requests[0].items[0].key(), "entries:a:en-us");
        assert_eq!(rejected.len(), 2);
        let error = rejected.take("entries:bad:en-us").unwrap().unwrap_err();
        assert!(error.contains("invalid publish payload"));
        assert!(matches!(rejected.take("locales:l1"), Some(Err(_))));
        assert!(rejected.take("entries:a:en-us").is_none());
    }

    #[tokio::test]
    async fn test_bulk_update_is_unsupported() {
        let target = StackTarget::new("https://api.example.test", "key", "token", None);
        let api = HttpStackApi::new(target, &RateLimiterConfig::default(), Duration::from_secs(5))
            .unwrap();
        let result = api.bulk(WorkKind::Update, &[]).await;
        assert!(matches!(result, Err(StackApiError::Unsupported(_))));
    }
}
