use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::responses::JsonResponse;
use crate::state::AppState;

pub const DEFAULT_SUMMARY_DAYS: i64 = 7;
pub const MAX_SUMMARY_DAYS: i64 = 365;

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub days: Option<i64>,
}

/// `GET /api/usage/summary?days=`: per-model totals, cached per window.
pub async fn usage_summary(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Response {
    let days = query
        .days
        .unwrap_or(DEFAULT_SUMMARY_DAYS)
        .clamp(1, MAX_SUMMARY_DAYS);

    if let Some(models) = state.usage_cache.get(&days) {
        return Json(json!({ "success": true, "days": days, "cached": true, "models": models }))
            .into_response();
    }

    let since = Utc::now() - Duration::days(days);
    match state.usage_repo.usage_summary(since).await {
        Ok(models) => {
            state.usage_cache.insert(days, models.clone());
            Json(json!({ "success": true, "days": days, "cached": false, "models": models }))
                .into_response()
        }
        Err(err) => {
            error!(error = %err, days, "failed to load usage summary");
            JsonResponse::server_error_with("Failed to load usage summary", &err.to_string())
                .into_response()
        }
    }
}
