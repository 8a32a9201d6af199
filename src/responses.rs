use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonResponse {
    pub status: String,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JsonResponse {
    fn reply(code: StatusCode, msg: &str, error: Option<String>) -> impl IntoResponse {
        let success = code.is_success();
        (
            code,
            Json(JsonResponse {
                status: if success { "success" } else { "error" }.to_string(),
                success,
                message: msg.to_string(),
                error,
            }),
        )
    }

    pub fn success(msg: &str) -> impl IntoResponse {
        Self::reply(StatusCode::OK, msg, None)
    }

    pub fn not_found(msg: &str) -> impl IntoResponse {
        Self::reply(StatusCode::NOT_FOUND, msg, None)
    }

    pub fn unauthorized(msg: &str) -> impl IntoResponse {
        Self::reply(StatusCode::UNAUTHORIZED, msg, None)
    }

    pub fn bad_request(msg: &str) -> impl IntoResponse {
        Self::reply(StatusCode::BAD_REQUEST, msg, None)
    }

    pub fn server_error(msg: &str) -> impl IntoResponse {
        Self::reply(StatusCode::INTERNAL_SERVER_ERROR, msg, None)
    }

    /// 500 carrying the underlying error text next to the message.
    pub fn server_error_with(msg: &str, error: &str) -> impl IntoResponse {
        Self::reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            msg,
            Some(error.to_string()),
        )
    }

    /// 502 for failures of the upstream N8N API.
    pub fn bad_gateway(msg: &str, error: &str) -> impl IntoResponse {
        Self::reply(StatusCode::BAD_GATEWAY, msg, Some(error.to_string()))
    }
}
