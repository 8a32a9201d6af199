use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::engine::lead_metrics::{aggregate_lead_metrics, process_lead_payload};
use crate::responses::JsonResponse;
use crate::state::AppState;
use crate::utils::auth::{check_secret, SecretCheck};

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

fn authorize_webhook(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    match check_secret(state.config.webhook_secret.as_deref(), [provided]) {
        SecretCheck::Authorized => Ok(()),
        SecretCheck::NotConfigured if state.config.is_development() => {
            warn!("WEBHOOK_SECRET is not set; accepting lead webhook in development");
            Ok(())
        }
        SecretCheck::NotConfigured => {
            error!("WEBHOOK_SECRET is not configured");
            Err(
                JsonResponse::server_error_with("Server misconfigured", "WEBHOOK_SECRET is not set")
                    .into_response(),
            )
        }
        SecretCheck::Unauthorized => {
            warn!("rejected lead webhook with an invalid secret");
            Err(JsonResponse::unauthorized("Unauthorized").into_response())
        }
    }
}

/// `POST /api/webhooks/lead-capture`: counts one lead emitted by an N8N
/// workflow into the daily metrics of that workflow.
pub async fn lead_capture(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = authorize_webhook(&state, &headers) {
        return response;
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "lead webhook body is not JSON");
            return JsonResponse::bad_request("Invalid data format").into_response();
        }
    };
    let Some(lead) = process_lead_payload(&payload, Utc::now()) else {
        warn!("lead webhook payload carries no contact");
        return JsonResponse::bad_request("Invalid data format").into_response();
    };

    let Some(metric) = aggregate_lead_metrics(std::slice::from_ref(&lead))
        .into_iter()
        .next()
    else {
        return JsonResponse::server_error("Failed to aggregate lead").into_response();
    };

    let stored = match state.lead_repo.accumulate_lead_metric(&metric).await {
        Ok(stored) => stored,
        Err(err) => {
            error!(
                workflow_id = %metric.workflow_id,
                date = %metric.date,
                error = %err,
                "failed to store lead metric"
            );
            return JsonResponse::server_error_with("Failed to store lead metrics", &err.to_string())
                .into_response();
        }
    };

    info!(
        workflow_id = %stored.workflow_id,
        status = lead.status.as_str(),
        total_leads = stored.total_leads,
        "lead captured"
    );

    Json(json!({
        "success": true,
        "message": "Lead processed successfully",
        "lead": {
            "phone": lead.remotejid,
            "status": lead.status,
            "workflow": lead.workflow_name,
            "source": lead.source,
            "timestamp": lead.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        },
        "metrics": {
            "date": stored.date,
            "workflow": stored.workflow_name,
            "total_leads": stored.total_leads,
            "qualified_leads": stored.qualified_leads,
            "conversion_rate": stored.conversion_rate,
        }
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::mock_db::{MockLeadMetricsRepository, MockUsageRepository};
    use crate::routes::api_router;
    use crate::services::mock_n8n::MockN8n;
    use crate::state::test_support::{default_test_state, test_state};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use chrono::NaiveDate;
    use tower::util::ServiceExt;

    fn hook(secret: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/webhooks/lead-capture")
            .header("Content-Type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(WEBHOOK_SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn captures_lead_and_accumulates_metrics() {
        let t = default_test_state();
        let app = api_router().with_state(t.state.clone());
        let first = json!({
            "remotejid": "5511999998888@s.whatsapp.net",
            "workflowId": "wf-7",
            "workflowName": "Sofia - Clinica",
            "status": "qualificado",
            "source": "instagram",
            "timestamp": "2024-03-10T14:30:00Z"
        });
        let second = json!({
            "phone": "+55 11 98888-7777",
            "workflow": { "id": "wf-7", "name": "Sofia - Clinica" },
            "status": "desqualificado",
            "timestamp": "2024-03-10T18:00:00Z"
        });

        let (status, json) = send(app.clone(), hook(Some("hook-secret"), &first.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["lead"]["phone"], "11999998888");
        assert_eq!(json["lead"]["status"], "qualified");
        assert_eq!(json["lead"]["source"], "instagram");
        assert_eq!(json["metrics"]["total_leads"], 1);
        assert_eq!(json["metrics"]["conversion_rate"], 1.0);

        let (status, json) = send(app, hook(Some("hook-secret"), &second.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["metrics"]["date"], "2024-03-10");
        assert_eq!(json["metrics"]["total_leads"], 2);
        assert_eq!(json["metrics"]["qualified_leads"], 1);
        assert_eq!(json["metrics"]["conversion_rate"], 0.5);

        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let stored = t.leads.get(date, "wf-7").expect("metric");
        assert_eq!(stored.unqualified_leads, 1);
        assert_eq!(stored.lead_details.as_array().map(Vec::len), Some(2));
        assert_eq!(*t.leads.accumulate_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn wrong_secret_is_401() {
        let app = api_router().with_state(default_test_state().state);
        let body = json!({ "phone": "5511999998888" }).to_string();

        let (status, json) = send(app.clone(), hook(Some("nope"), &body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Unauthorized");

        let (status, _) = send(app, hook(None, &body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_secret_depends_on_environment() {
        let body = json!({ "phone": "5511999998888" }).to_string();

        let mut config = Config::for_tests();
        config.webhook_secret = None;
        let t = test_state(
            MockUsageRepository::default(),
            MockLeadMetricsRepository::default(),
            MockN8n::default(),
            config.clone(),
        );
        let (status, _) = send(api_router().with_state(t.state), hook(None, &body)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        config.app_env = "development".to_string();
        let t = test_state(
            MockUsageRepository::default(),
            MockLeadMetricsRepository::default(),
            MockN8n::default(),
            config,
        );
        let (status, json) = send(api_router().with_state(t.state), hook(None, &body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["lead"]["status"], "captured");
        assert_eq!(json["lead"]["workflow"], "Unknown Workflow");
    }

    #[tokio::test]
    async fn payload_without_contact_is_400() {
        let app = api_router().with_state(default_test_state().state);

        let (status, json) = send(
            app.clone(),
            hook(Some("hook-secret"), &json!({ "name": "Maria" }).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Invalid data format");

        let (status, _) = send(app, hook(Some("hook-secret"), "not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn store_failure_is_500() {
        let t = test_state(
            MockUsageRepository::default(),
            MockLeadMetricsRepository {
                should_fail: true,
                ..Default::default()
            },
            MockN8n::default(),
            Config::for_tests(),
        );
        let body = json!({ "phone": "5511999998888" }).to_string();

        let (status, json) = send(api_router().with_state(t.state), hook(Some("hook-secret"), &body)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
    }
}
