pub mod calendar;
pub mod dashboard;
pub mod episodes;
pub mod kanban;
pub mod programs;
pub mod review;
pub mod session;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::error;

use crate::core::tracker::TrackerError;

/// Error body in the same `{"success": false, "error"}` shape as every
/// other response, with a status that tells validation from backend trouble.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        let status = match &err {
            TrackerError::Validation(_) | TrackerError::Transition(_) => StatusCode::BAD_REQUEST,
            TrackerError::NotFound { .. } => StatusCode::NOT_FOUND,
            TrackerError::Backend(_) => StatusCode::BAD_GATEWAY,
        };
        if status == StatusCode::BAD_GATEWAY {
            error!("Backend error: {}", err);
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

pub type ApiResult = Result<Json<Value>, ApiError>;

/// `{"success": true, key: value}`
pub fn ok(key: &str, value: impl serde::Serialize) -> ApiResult {
    let value = serde_json::to_value(value)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let mut body = serde_json::Map::new();
    body.insert("success".into(), Value::Bool(true));
    body.insert(key.into(), value);
    Ok(Json(Value::Object(body)))
}

pub fn done() -> ApiResult {
    Ok(Json(json!({ "success": true })))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok" }))
}
