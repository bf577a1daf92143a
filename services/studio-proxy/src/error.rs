//! Error envelope returned at the HTTP boundary
//!
//! Every failure leaves the proxy as
//! `{"error":{"type":"<kind>","message":"...","request_id":"req_..."}}`.
//! With `always_ok` the status stays 200 for clients that only read the body;
//! otherwise the kind picks a 4xx/5xx status.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// A failed request, ready to render.
#[derive(Debug)]
pub struct ApiError {
    pub kind: &'static str,
    pub message: String,
    pub request_id: String,
    pub always_ok: bool,
}

impl ApiError {
    pub fn from_pool(err: &credit_pool::Error, request_id: &str, always_ok: bool) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            request_id: request_id.to_string(),
            always_ok,
        }
    }

    pub fn invalid_request(message: impl Into<String>, request_id: &str, always_ok: bool) -> Self {
        Self {
            kind: "invalid_request_error",
            message: message.into(),
            request_id: request_id.to_string(),
            always_ok,
        }
    }

    /// Status used when `always_ok` is off.
    pub fn status(&self) -> StatusCode {
        match self.kind {
            "invalid_request_error" => StatusCode::BAD_REQUEST,
            "session_establish_error" | "auth_init_error" | "no_active_credential" => {
                StatusCode::UNAUTHORIZED
            }
            "version_lookup_error" | "token_renew_error" | "quota_query_error"
            | "upstream_request_error" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.always_ok {
            StatusCode::OK
        } else {
            self.status()
        };
        let body = serde_json::json!({
            "error": {
                "type": self.kind,
                "message": self.message,
                "request_id": self.request_id,
            }
        });
        (status, Json(body)).into_response()
    }
}
