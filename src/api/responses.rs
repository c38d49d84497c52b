//! Response envelope (§6: "All responses carry the envelope
//! `{success, data, message, meta?}`; errors carry
//! `{success:false, error, message, meta?}`").
//!
//! Generalized from the donor's `ApiResponse<T>` — same success-flag +
//! generic-data + `IntoResponse` shape — with its HAL `links`, pagination,
//! and JSON:API/RFC7807 richness dropped: spec's envelope is exactly four
//! fields, no more.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

/// Standard success envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
            meta: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: Some(message.into()),
            meta: None,
        }
    }
}

/// Wraps an `ApiResponse<T>` with the HTTP status to return it under
/// (spec allows both 200 and 201/202 for success paths).
pub struct Reply<T> {
    pub status: StatusCode,
    pub body: ApiResponse<T>,
}

impl<T> Reply<T> {
    pub fn new(status: StatusCode, data: T) -> Self {
        Self {
            status,
            body: ApiResponse::ok(data),
        }
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_has_no_error_field() {
        let response = ApiResponse::ok(serde_json::json!({"id": "n1"}));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], true);
        assert!(value.get("error").is_none());
    }
}
