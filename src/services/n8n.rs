use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::execution::Execution;
use crate::models::workflow::WorkflowSummary;

pub const API_KEY_HEADER: &str = "X-N8N-API-KEY";
const WORKFLOW_PAGE_SIZE: u32 = 250;

#[derive(Debug, Error)]
pub enum N8nError {
    #[error("N8N request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("N8N API responded with status {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("N8N API returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl N8nError {
    fn is_api_error(&self) -> bool {
        matches!(self, N8nError::Api { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionQuery {
    pub workflow_id: String,
    pub status: Option<String>,
    pub limit: u32,
}

#[async_trait]
pub trait N8nApi: Send + Sync {
    /// Every workflow, following `nextCursor` until the last page.
    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, N8nError>;

    /// Recent executions of one workflow, newest first as N8N returns them.
    async fn list_executions(&self, query: &ExecutionQuery) -> Result<Vec<Execution>, N8nError>;

    /// One execution including its `runData`.
    async fn get_execution(&self, id: &str) -> Result<Execution, N8nError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Clone)]
pub struct N8nClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl N8nClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, api_key)
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        build_url(&self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, N8nError> {
        let response = self
            .client
            .get(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|err| err.message)
                .map(|msg| msg.trim().to_string())
                .filter(|msg| !msg.is_empty())
                .or_else(|| {
                    let trimmed = body.trim();
                    (!trimmed.is_empty()).then(|| trimmed.to_string())
                })
                .unwrap_or_else(|| "N8N API request failed".to_string());
            return Err(N8nError::Api { status, message });
        }

        serde_json::from_str::<T>(&body).map_err(|err| N8nError::InvalidResponse(err.to_string()))
    }

    /// Tries each path in turn, moving on only when N8N answers with a
    /// non-2xx status. The last error is returned if every path fails.
    async fn get_first<T: DeserializeOwned>(&self, paths: &[String]) -> Result<T, N8nError> {
        let mut last_err = N8nError::InvalidResponse("no endpoint to query".into());
        for path in paths {
            match self.get::<T>(path).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_api_error() => {
                    debug!(%path, error = %err, "n8n endpoint rejected request, trying fallback");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl N8nApi for N8nClient {
    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, N8nError> {
        let mut workflows = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors: Vec<String> = Vec::new();

        loop {
            let mut path = format!("/workflows?limit={WORKFLOW_PAGE_SIZE}");
            if let Some(cursor) = &cursor {
                path.push_str(&format!("&cursor={}", urlencoding::encode(cursor)));
            }
            let body: Value = self.get(&path).await?;
            let page = match body {
                Value::Array(items) => Page {
                    data: items,
                    next_cursor: None,
                },
                other => serde_json::from_value::<Page>(other)
                    .map_err(|err| N8nError::InvalidResponse(err.to_string()))?,
            };
            workflows.extend(parse_items::<WorkflowSummary>(page.data, "workflow"));

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) if !seen_cursors.contains(&next) => {
                    seen_cursors.push(next.clone());
                    cursor = Some(next);
                }
                _ => break,
            }
        }
        Ok(workflows)
    }

    async fn list_executions(&self, query: &ExecutionQuery) -> Result<Vec<Execution>, N8nError> {
        let workflow_id = urlencoding::encode(&query.workflow_id);
        let mut params = format!("limit={}", query.limit);
        if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
            params.push_str(&format!("&status={}", urlencoding::encode(status)));
        }

        let paths = [
            format!("/executions?workflowId={workflow_id}&{params}&includeData=true"),
            format!("/workflows/{workflow_id}/executions?{params}"),
            format!("/workflows/{workflow_id}/runs?{params}"),
        ];
        let body: Value = self.get_first(&paths).await?;
        let items = execution_items(body)?;
        Ok(parse_items::<Execution>(items, "execution"))
    }

    async fn get_execution(&self, id: &str) -> Result<Execution, N8nError> {
        let encoded = urlencoding::encode(id);
        let paths = [
            format!("/executions/{encoded}?includeData=true"),
            format!("/executions/{encoded}/data"),
        ];
        let body: Value = self.get_first(&paths).await?;

        // `/data` may answer with the bare `data` object of the execution.
        let mut execution = if body.get("resultData").is_some() {
            Execution {
                data: Some(body),
                ..Default::default()
            }
        } else {
            serde_json::from_value::<Execution>(body)
                .map_err(|err| N8nError::InvalidResponse(err.to_string()))?
        };
        if execution.id.is_none() {
            execution.id = Some(id.to_string());
        }
        Ok(execution)
    }
}

fn build_url(base: &str, path: &str) -> String {
    let trimmed_base = base.trim_end_matches('/');
    let trimmed_path = path.trim_start_matches('/');
    format!("{}/{}", trimmed_base, trimmed_path)
}

/// Accepts `{data: [...]}`, `{executions: [...]}` or a bare array.
fn execution_items(body: Value) -> Result<Vec<Value>, N8nError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => ["data", "executions"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| {
                N8nError::InvalidResponse("execution list has no data or executions array".into())
            }),
        _ => Err(N8nError::InvalidResponse(
            "execution list is not an object or array".into(),
        )),
    }
}

fn parse_items<T: DeserializeOwned>(items: Vec<Value>, kind: &str) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(kind, error = %err, "skipping unreadable n8n item");
                None
            }
        })
        .collect()
}
