//! HTTP client for the Central entity API.

use super::auth::SessionAuth;
use super::config::{CentralConfig, TokenCache};
use super::urls::{base_url_validate, dataset_path, quote};
use crate::error::{RemoteError, RemoteResult};
use crate::remote::{CreateSource, EntityListRef, EntityPatch, EntityRemote, NewEntity};
use async_trait::async_trait;
use entisync_types::{EntityId, FieldValue, SystemMeta, TargetRow};
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Transport-level retry of idempotent requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each further attempt.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// PATCH carries a version precondition and is never retried.
    pub fn retries_method(&self, method: &Method) -> bool {
        matches!(*method, Method::GET | Method::PUT | Method::POST | Method::DELETE)
    }

    pub fn retries_status(&self, status: u16) -> bool {
        matches!(status, 429 | 502 | 503 | 504)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(1 << attempt.min(16))
    }
}

#[derive(Debug, Deserialize)]
struct ODataPage {
    value: Vec<TargetRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityResponse {
    uuid: EntityId,
    current_version: EntityVersion,
}

#[derive(Debug, Deserialize)]
struct EntityVersion {
    label: String,
    version: u32,
    #[serde(default)]
    data: BTreeMap<String, Option<String>>,
}

impl From<EntityResponse> for TargetRow {
    fn from(entity: EntityResponse) -> Self {
        TargetRow {
            id: entity.uuid,
            system: SystemMeta::with_version(entity.current_version.version),
            label: entity.current_version.label,
            properties: entity.current_version.data,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Problem {
    code: Option<Value>,
    message: Option<String>,
}

/// Central stores property values as text; null clears a value.
fn data_json(data: &BTreeMap<String, FieldValue>) -> Map<String, Value> {
    data.iter()
        .map(|(name, value)| {
            let v = value
                .as_text()
                .map_or(Value::Null, |t| Value::String(t.into_owned()));
            (name.clone(), v)
        })
        .collect()
}

/// [`EntityRemote`] backed by a Central server.
pub struct CentralClient {
    http: Client,
    base_url: String,
    auth: SessionAuth,
    retry: RetryPolicy,
}

impl CentralClient {
    /// Builds a client from validated settings. `cache` holds the session
    /// token between runs; without it every run logs in again.
    pub fn new(config: &CentralConfig, cache: Option<TokenCache>) -> RemoteResult<Self> {
        config
            .validate()
            .map_err(|e| RemoteError::Config(e.to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(format!("entisync v{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url_validate(&config.base_url, &config.api_version),
            auth: SessionAuth::new(config.username.clone(), config.password.clone(), cache),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                ..RetryPolicy::default()
            },
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// API root, ending in `/<api_version>/`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends an authenticated request, retrying transient failures.
    ///
    /// A 401 drops the session and retries once with a fresh login.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> RemoteResult<Response> {
        let url = self.url(path);
        let retryable = self.retry.retries_method(&method);
        let mut attempt = 0;
        let mut reauthenticated = false;

        loop {
            let token = self.auth.token(&self.http, &self.base_url).await?;
            let mut request = self.http.request(method.clone(), &url).bearer_auth(&token);
            if let Some(body) = body {
                request = request.json(body);
            }
            debug!("{} {}", method, url);

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if retryable && attempt < self.retry.max_retries && (e.is_timeout() || e.is_connect()) => {
                    warn!("{} {} failed ({}), retrying", method, url, e);
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                return Ok(response);
            }
            if status == 401 && !reauthenticated {
                info!("Session token rejected, logging in again");
                self.auth.invalidate().await;
                reauthenticated = true;
                continue;
            }
            if retryable && attempt < self.retry.max_retries && self.retry.retries_status(status) {
                warn!("{} {} returned {}, retrying", method, url, status);
                tokio::time::sleep(self.retry.delay(attempt)).await;
                attempt += 1;
                continue;
            }
            return Err(api_error(url, response).await);
        }
    }
}

async fn api_error(url: String, response: Response) -> RemoteError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<Problem>(&body) {
        Ok(problem) => (
            problem.code.map(|c| match c {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            problem.message.unwrap_or(body),
        ),
        Err(_) => (None, body),
    };
    RemoteError::Api {
        url,
        status,
        code,
        message,
    }
}

#[async_trait]
impl EntityRemote for CentralClient {
    fn provider_name(&self) -> &'static str {
        "ODK Central"
    }

    async fn fetch_target_rows(&self, list: &EntityListRef) -> RemoteResult<Vec<TargetRow>> {
        let path = format!("{}.svc/Entities", dataset_path(list.project_id, &list.name));
        let response = self.send(Method::GET, &path, None).await?;
        let text = response.text().await?;
        let page: ODataPage = serde_json::from_str(&text)?;
        debug!("Read {} entities from {}", page.value.len(), list);
        Ok(page.value)
    }

    async fn register_property(&self, list: &EntityListRef, name: &str) -> RemoteResult<bool> {
        let path = format!("{}/properties", dataset_path(list.project_id, &list.name));
        let body = json!({ "name": name });
        match self.send(Method::POST, &path, Some(&body)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn batch_create(
        &self,
        list: &EntityListRef,
        rows: Vec<NewEntity>,
        source: &CreateSource,
    ) -> RemoteResult<()> {
        let path = format!("{}/entities", dataset_path(list.project_id, &list.name));
        let entities: Vec<Value> = rows
            .iter()
            .map(|row| json!({ "label": row.label, "data": data_json(&row.data) }))
            .collect();
        let body = json!({ "entities": entities, "source": source });
        self.send(Method::POST, &path, Some(&body)).await?;
        Ok(())
    }

    async fn update_row(
        &self,
        list: &EntityListRef,
        id: EntityId,
        patch: EntityPatch,
        base_version: u32,
    ) -> RemoteResult<TargetRow> {
        let path = format!(
            "{}/entities/{}?baseVersion={}",
            dataset_path(list.project_id, &list.name),
            quote(&id.to_string()),
            base_version
        );
        let mut body = Map::new();
        if let Some(label) = patch.label {
            body.insert("label".to_string(), Value::String(label));
        }
        if let Some(data) = &patch.data {
            body.insert("data".to_string(), Value::Object(data_json(data)));
        }
        let response = self.send(Method::PATCH, &path, Some(&Value::Object(body))).await?;
        let text = response.text().await?;
        let entity: EntityResponse = serde_json::from_str(&text)?;
        Ok(entity.into())
    }

    async fn delete_row(&self, list: &EntityListRef, id: EntityId) -> RemoteResult<()> {
        let path = format!(
            "{}/entities/{}",
            dataset_path(list.project_id, &list.name),
            quote(&id.to_string())
        );
        self.send(Method::DELETE, &path, None).await?;
        Ok(())
    }
}
