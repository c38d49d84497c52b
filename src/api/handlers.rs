//! Gateway HTTP handlers: auth surface (C5), notification dispatch (C6),
//! and composite health (C8).
//!
//! Generalized from the donor's `handlers.rs` — same `State<Arc<_>>` +
//! `Json<Dto>` + `Result<Reply<_>, Error>` handler shape, same reliance on
//! the response envelope types in [`super::responses`] — onto the four
//! operations this platform actually exposes. The donor's scan/issue/site
//! CRUD handlers have no counterpart here.

use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::broker::{NotificationEnvelope, EMAIL_QUEUE, PUSH_QUEUE};
use crate::cache::CacheClient;
use crate::enterprise::auth::TokenClaims;
use crate::error::{Error, Result};
use crate::store::User;

use super::responses::{ApiResponse, Reply};
use super::state::GatewayState;

const IDEMPOTENCY_TTL: std::time::Duration = std::time::Duration::from_secs(86_400);
const STATUS_TTL: std::time::Duration = std::time::Duration::from_secs(3600);

fn idempotency_key(key: &str) -> String {
    format!("idempotency:{key}")
}

fn status_key(notification_id: &str) -> String {
    format!("notification:{notification_id}")
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: UserSummary,
}

/// `POST /auth/login`.
pub async fn login(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Reply<TokenResponse>> {
    let (user, pair) = state.auth.login(&body.email, &body.password).await?;
    Ok(Reply::new(
        StatusCode::OK,
        TokenResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: pair.token_type,
            expires_in: pair.expires_in,
            user: UserSummary::from(&user),
        },
    ))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// `POST /auth/refresh`.
pub async fn refresh(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Reply<RefreshResponse>> {
    let pair = state.auth.refresh(&body.refresh_token).await?;
    Ok(Reply::new(
        StatusCode::OK,
        RefreshResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: pair.token_type,
            expires_in: pair.expires_in,
        },
    ))
}

/// `POST /auth/logout` (Bearer).
pub async fn logout(
    State(state): State<Arc<GatewayState>>,
    headers: axum::http::HeaderMap,
) -> Result<Reply<Value>> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or_else(|| Error::Unauthorized("missing bearer token".into()))?;

    state.auth.logout(token).await?;
    Ok(Reply::new(StatusCode::OK, serde_json::json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ValidateResponse {
    Valid {
        valid: bool,
        user_id: String,
        email: String,
        expires_at: u64,
    },
    Invalid {
        valid: bool,
        reason: String,
    },
}

/// `POST /auth/validate`. Never returns an error status — an invalid
/// token is reported `{valid:false, reason}` in a 200 body.
pub async fn validate(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<ValidateRequest>,
) -> Reply<ValidateResponse> {
    match state.auth.validate(&body.token).await {
        Ok(claims) => Reply::new(
            StatusCode::OK,
            ValidateResponse::Valid {
                valid: true,
                user_id: claims.sub,
                email: claims.email,
                expires_at: claims.exp,
            },
        ),
        Err(e) => Reply::new(
            StatusCode::OK,
            ValidateResponse::Invalid {
                valid: false,
                reason: e.to_string(),
            },
        ),
    }
}

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    pub notification_type: String,
    pub template_code: String,
    #[serde(default)]
    pub variables: serde_json::Map<String, Value>,
    pub request_id: String,
    #[serde(default)]
    pub priority: i32,
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct SendNotificationResponse {
    pub notification_id: String,
    pub status: &'static str,
    pub queues: Vec<&'static str>,
}

async fn write_pending_status(cache: &CacheClient, notification_id: &str, status: &str, notification_type: &str) {
    let value = serde_json::json!({
        "status": status,
        "notification_type": notification_type,
    });
    if let Ok(bytes) = serde_json::to_vec(&value) {
        if let Err(e) = cache.set(&status_key(notification_id), &bytes, Some(STATUS_TTL)).await {
            tracing::debug!(error = %e, notification_id, "failed to persist initial status record");
        }
    }
}

async fn mark_failed(cache: &CacheClient, notification_id: &str) {
    let value = serde_json::json!({"status": "failed"});
    if let Ok(bytes) = serde_json::to_vec(&value) {
        let _ = cache.set(&status_key(notification_id), &bytes, Some(STATUS_TTL)).await;
    }
}

fn variable_language(variables: &serde_json::Map<String, Value>) -> String {
    variables
        .get("language")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "en".to_string())
}

/// `POST /notifications/send` (§4.6). Requires `X-Idempotency-Key` and a
/// valid bearer token; the latter is consumed upstream by
/// [`super::middleware::auth_middleware`], which stashes the decoded
/// claims used here to resolve the recipient.
pub async fn send_notification(
    State(state): State<Arc<GatewayState>>,
    Extension(claims): Extension<TokenClaims>,
    headers: axum::http::HeaderMap,
    Json(body): Json<SendNotificationRequest>,
) -> Result<Reply<SendNotificationResponse>> {
    let idempotency_header = headers
        .get("X-Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation("X-Idempotency-Key header is required".into()))?
        .to_string();

    let queue = match body.notification_type.as_str() {
        "email" => EMAIL_QUEUE,
        "push" => PUSH_QUEUE,
        other => return Err(Error::Validation(format!("unknown notification_type {other}"))),
    };

    let reserved = state
        .cache
        .set_if_absent(&idempotency_key(&idempotency_header), b"processing", IDEMPOTENCY_TTL)
        .await?;
    if !reserved {
        return Err(Error::Conflict("duplicate idempotency key".into()));
    }

    let result = dispatch(&state, &claims, &body, queue, &idempotency_header).await;

    if result.is_err() {
        // Key is intentionally NOT released past this point (spec §4.6 step 6).
        mark_failed(&state.cache, &body.request_id).await;
    }

    result
}

async fn dispatch(
    state: &Arc<GatewayState>,
    claims: &TokenClaims,
    body: &SendNotificationRequest,
    queue: &'static str,
    idempotency_header: &str,
) -> Result<Reply<SendNotificationResponse>> {
    let user = state
        .users
        .find_by_id(
            Uuid::parse_str(&claims.sub).map_err(|_| Error::Unauthorized("malformed subject claim".into()))?,
        )
        .await
        .map_err(|_| Error::Unauthorized("unknown user".into()))?;

    write_pending_status(&state.cache, &body.request_id, "pending", &body.notification_type).await;

    let envelope = NotificationEnvelope {
        notification_id: body.request_id.clone(),
        idempotency_key: idempotency_header.to_string(),
        user_id: user.id.to_string(),
        push_token: user.push_token.clone(),
        recipient_email: Some(user.email.clone()),
        template_code: body.template_code.clone(),
        language: variable_language(&body.variables),
        variables: body.variables.clone(),
        created_by: user.id.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        metadata: body.metadata.clone(),
        attempt: 0,
    };

    let payload = serde_json::to_vec(&envelope)
        .map_err(|e| Error::Internal(format!("envelope serialize: {e}")))?;

    state
        .broker
        .publish(queue, &payload)
        .await
        .map_err(|e| Error::Unavailable(format!("broker publish failed: {e}")))?;

    Ok(Reply::new(
        StatusCode::OK,
        SendNotificationResponse {
            notification_id: body.request_id.clone(),
            status: "queued",
            queues: vec![queue],
        },
    ))
}

/// `GET /notifications/status/{id}` — stored record or 404 once the TTL
/// expires.
pub async fn get_notification_status(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<Reply<Value>> {
    let bytes = state
        .cache
        .get(&status_key(&id))
        .await?
        .ok_or_else(|| Error::NotFound(format!("notification {id}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Internal(format!("corrupt status record: {e}")))?;
    Ok(Reply::new(StatusCode::OK, value))
}

/// `GET /health` — rolled-up status only.
pub async fn health(State(state): State<Arc<GatewayState>>) -> axum::response::Response {
    let report = state.health.check().await;
    let status = report.http_status();
    (status, Json(ApiResponse::ok(serde_json::json!({"status": report.status})))).into_response()
}

/// `GET /health/services` — full per-dependency breakdown (§4.8).
pub async fn health_services(State(state): State<Arc<GatewayState>>) -> axum::response::Response {
    let report = state.health.check().await;
    let status = report.http_status();
    (status, Json(ApiResponse::ok(report))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_notification_type_rejected_before_dispatch() {
        let queue_result: std::result::Result<&str, String> = match "sms" {
            "email" => Ok(EMAIL_QUEUE),
            "push" => Ok(PUSH_QUEUE),
            other => Err(format!("unknown notification_type {other}")),
        };
        assert!(queue_result.is_err());
    }

    #[test]
    fn variable_language_defaults_to_en() {
        let map = serde_json::Map::new();
        assert_eq!(variable_language(&map), "en");
    }

    #[test]
    fn variable_language_honors_explicit_override() {
        let mut map = serde_json::Map::new();
        map.insert("language".to_string(), Value::String("fr".to_string()));
        assert_eq!(variable_language(&map), "fr");
    }
}
