use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

use super::super::AppState;
use super::{ApiError, ApiResult, ok};
use crate::core::backend::AuthError;

#[derive(Deserialize)]
pub struct Credentials {
    email: String,
    password: String,
}

fn auth_error(err: AuthError) -> ApiError {
    let status = match &err {
        AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        AuthError::EmailTaken => StatusCode::CONFLICT,
        AuthError::WeakPassword => StatusCode::BAD_REQUEST,
        AuthError::ConfirmationPending => StatusCode::ACCEPTED,
        AuthError::Backend(_) => StatusCode::BAD_GATEWAY,
    };
    ApiError::new(status, err.to_string())
}

fn email_of(creds: &Credentials) -> Result<String, ApiError> {
    let email = creds.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::bad_request("有効なメールアドレスを入力してください"));
    }
    Ok(email)
}

pub async fn sign_up(
    State(state): State<AppState>,
    Json(creds): Json<Credentials>,
) -> ApiResult {
    let email = email_of(&creds)?;
    let session = state
        .auth
        .sign_up(&email, &creds.password)
        .await
        .map_err(auth_error)?;
    info!("New account {}", email);
    ok("session", session)
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(creds): Json<Credentials>,
) -> ApiResult {
    let email = email_of(&creds)?;
    let session = state
        .auth
        .sign_in(&email, &creds.password)
        .await
        .map_err(auth_error)?;
    ok("session", session)
}

/// The deployment record plus the drop targets the kanban board highlights
/// and the subset of them that ask for a rollback reason.
pub async fn get_deployment(State(state): State<AppState>) -> ApiResult {
    let deployment = state.tracker.deployment();
    let allowed: BTreeMap<&str, Vec<&str>> = deployment
        .stages
        .iter()
        .map(|s| (s.as_str(), deployment.allowed_targets(s)))
        .collect();
    let needs_reason: BTreeMap<&str, Vec<&str>> = allowed
        .iter()
        .map(|(from, targets)| {
            let rollbacks = targets
                .iter()
                .copied()
                .filter(|to| deployment.requires_reason(from, to))
                .collect();
            (*from, rollbacks)
        })
        .collect();
    ok(
        "deployment",
        json!({
            "record": deployment,
            "allowed_targets": allowed,
            "reason_required": needs_reason,
        }),
    )
}
