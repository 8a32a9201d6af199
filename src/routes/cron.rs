use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::lead_sync::LeadSync;
use crate::engine::sync::{SyncOptions, UsageSync, MAX_LOOKBACK_DAYS};
use crate::responses::JsonResponse;
use crate::services::n8n::N8nApi;
use crate::state::AppState;
use crate::utils::auth::{bearer_token, check_secret, SecretCheck};

/// Options accepted on the query string and, for POST, in a JSON body.
/// Body values win over query values.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncParams {
    pub token: Option<String>,
    #[serde(alias = "lookbackDays")]
    pub days: Option<i64>,
    pub debug: Option<bool>,
    pub source: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

impl SyncParams {
    fn merge(self, body: SyncParams) -> SyncParams {
        SyncParams {
            token: body.token.or(self.token),
            days: body.days.or(self.days),
            debug: body.debug.or(self.debug),
            source: body.source.or(self.source),
            status: body.status.or(self.status),
            limit: body.limit.or(self.limit),
        }
    }

    fn options(&self, config: &Config, default_source: &str) -> SyncOptions {
        SyncOptions {
            lookback_days: self
                .days
                .unwrap_or(config.sync_lookback_days)
                .clamp(0, MAX_LOOKBACK_DAYS),
            source: self
                .source
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| default_source.to_string()),
            debug: self.debug.unwrap_or(false),
            status: self.status.clone().filter(|s| !s.trim().is_empty()),
            limit: self.limit.unwrap_or(config.sync_execution_limit),
        }
    }
}

/// Checks `CRON_SECRET` against the bearer header, then the query token.
pub(crate) fn authorize_cron(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<(), Response> {
    match check_secret(
        state.config.cron_secret.as_deref(),
        [bearer_token(headers), query_token],
    ) {
        SecretCheck::Authorized => Ok(()),
        SecretCheck::Unauthorized => {
            warn!("rejected cron request with an invalid secret");
            Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": "Unauthorized" })),
            )
                .into_response())
        }
        SecretCheck::NotConfigured => {
            error!("CRON_SECRET is not configured");
            Err(
                JsonResponse::server_error_with("Server misconfigured", "CRON_SECRET is not set")
                    .into_response(),
            )
        }
    }
}

pub(crate) fn require_n8n(state: &AppState) -> Result<&dyn N8nApi, Response> {
    match state.n8n.as_deref() {
        Some(n8n) => Ok(n8n),
        None => {
            error!("N8N_API_URL / N8N_API_KEY are not configured");
            Err(JsonResponse::server_error_with(
                "Server misconfigured",
                "N8N_API_URL and N8N_API_KEY must be set",
            )
            .into_response())
        }
    }
}

/// Auth, then the optional POST body. Returns the merged parameters.
fn prepare(
    state: &AppState,
    headers: &HeaderMap,
    query: SyncParams,
    body: &Bytes,
) -> Result<SyncParams, Response> {
    authorize_cron(state, headers, query.token.as_deref())?;

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(query);
    }
    match serde_json::from_slice::<SyncParams>(body) {
        Ok(from_body) => Ok(query.merge(from_body)),
        Err(err) => {
            warn!(error = %err, "invalid cron request body");
            Err(JsonResponse::bad_request("Invalid request body").into_response())
        }
    }
}

fn default_source(method: &Method) -> &'static str {
    if method == Method::POST {
        "manual"
    } else {
        "cron"
    }
}

/// `GET|POST /api/cron/sync-n8n`: one usage sync over the lookback window.
pub async fn sync_n8n(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<SyncParams>,
    body: Bytes,
) -> Response {
    let params = match prepare(&state, &headers, query, &body) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let n8n = match require_n8n(&state) {
        Ok(n8n) => n8n,
        Err(response) => return response,
    };

    let options = params.options(&state.config, default_source(&method));
    info!(source = %options.source, lookback_days = options.lookback_days, "n8n usage sync requested");

    match UsageSync::new(n8n, state.usage_repo.as_ref())
        .run(&options)
        .await
    {
        Ok(report) => {
            if report.stats.records_saved > 0 {
                state.usage_cache.invalidate_all();
            }
            Json(report).into_response()
        }
        Err(err) => {
            error!(error = %err, "n8n usage sync failed");
            JsonResponse::server_error_with("N8N sync failed", &err.to_string()).into_response()
        }
    }
}

/// `GET|POST /api/cron/update-lead-metrics`: recomputes lead metrics from
/// the executions in the lookback window.
pub async fn update_lead_metrics(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<SyncParams>,
    body: Bytes,
) -> Response {
    let params = match prepare(&state, &headers, query, &body) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let n8n = match require_n8n(&state) {
        Ok(n8n) => n8n,
        Err(response) => return response,
    };

    let options = params.options(&state.config, default_source(&method));
    match LeadSync::new(n8n, state.lead_repo.as_ref())
        .run(&options)
        .await
    {
        Ok(report) => Json(report).into_response(),
        Err(err) => {
            error!(error = %err, "lead metrics update failed");
            JsonResponse::server_error_with("Lead metrics update failed", &err.to_string())
                .into_response()
        }
    }
}
