pub mod cron;
pub mod diagnostics;
pub mod leads;
pub mod usage;
pub mod webhooks;

use axum::{
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};

use crate::{responses::JsonResponse, state::AppState};

/// Every HTTP route of the service. Middleware (tracing, CORS) is layered on
/// by the server binary.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route(
            "/api/cron/sync-n8n",
            get(cron::sync_n8n).post(cron::sync_n8n),
        )
        .route(
            "/api/cron/update-lead-metrics",
            get(cron::update_lead_metrics).post(cron::update_lead_metrics),
        )
        .route("/api/webhooks/lead-capture", post(webhooks::lead_capture))
        .route("/api/usage/summary", get(usage::usage_summary))
        .route("/api/metrics/lead-metrics", get(leads::lead_metrics))
        .route(
            "/api/n8n/executions/{id}/usage",
            get(diagnostics::execution_usage),
        )
}

/// Health check.
async fn root() -> Response {
    JsonResponse::success("agent-metrics-backend is running").into_response()
}
