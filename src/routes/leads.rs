use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::error;

use crate::models::lead::conversion_rate;
use crate::responses::JsonResponse;
use crate::routes::usage::{UsageQuery, DEFAULT_SUMMARY_DAYS, MAX_SUMMARY_DAYS};
use crate::state::AppState;

/// `GET /api/metrics/lead-metrics?days=`: stored daily lead rows, newest
/// first, plus totals over the window.
pub async fn lead_metrics(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Response {
    let days = query
        .days
        .unwrap_or(DEFAULT_SUMMARY_DAYS)
        .clamp(1, MAX_SUMMARY_DAYS);
    let since = (Utc::now() - Duration::days(days)).date_naive();

    let metrics = match state.lead_repo.list_lead_metrics(since).await {
        Ok(metrics) => metrics,
        Err(err) => {
            error!(error = %err, days, "failed to load lead metrics");
            return JsonResponse::server_error_with("Failed to load lead metrics", &err.to_string())
                .into_response();
        }
    };

    let total: i32 = metrics.iter().map(|m| m.total_leads).sum();
    let qualified: i32 = metrics.iter().map(|m| m.qualified_leads).sum();
    let unqualified: i32 = metrics.iter().map(|m| m.unqualified_leads).sum();

    Json(json!({
        "success": true,
        "days": days,
        "totals": {
            "total_leads": total,
            "qualified_leads": qualified,
            "unqualified_leads": unqualified,
            "conversion_rate": conversion_rate(qualified, unqualified),
        },
        "metrics": metrics,
    }))
    .into_response()
}
