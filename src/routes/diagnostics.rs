use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use crate::engine::usage_extractor::extract_usage;
use crate::responses::JsonResponse;
use crate::routes::cron::{authorize_cron, require_n8n};
use crate::services::n8n::N8nError;
use crate::state::AppState;

/// `GET /api/n8n/executions/{id}/usage`: runs the usage extractor over one
/// execution and returns what a sync would store, without storing it.
pub async fn execution_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = authorize_cron(&state, &headers, None) {
        return response;
    }
    let n8n = match require_n8n(&state) {
        Ok(n8n) => n8n,
        Err(response) => return response,
    };

    let execution = match n8n.get_execution(&id).await {
        Ok(execution) => execution,
        Err(N8nError::Api { status, .. }) if status == reqwest::StatusCode::NOT_FOUND => {
            return JsonResponse::not_found("Execution not found").into_response();
        }
        Err(err) => {
            warn!(execution_id = %id, error = %err, "failed to fetch execution");
            return JsonResponse::bad_gateway("Failed to fetch execution", &err.to_string())
                .into_response();
        }
    };

    match extract_usage(&execution) {
        Ok(records) => {
            let total_tokens = records
                .iter()
                .fold(0u64, |sum, r| sum.saturating_add(r.total_tokens));
            let estimated_cost: f64 = records.iter().map(|r| r.cost).sum();
            Json(json!({
                "success": true,
                "executionId": id,
                "hasRunData": execution.has_run_data(),
                "totalTokens": total_tokens,
                "estimatedCost": estimated_cost,
                "records": records,
            }))
            .into_response()
        }
        Err(err) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "success": false,
                "message": "Execution data could not be read",
                "error": err.to_string(),
            })),
        )
            .into_response(),
    }
}
