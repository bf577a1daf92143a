//! HTTP handlers
//!
//! Each handler invokes exactly one studio operation and answers with its
//! JSON result or the error envelope. Nothing escapes as a bare 500: body
//! and query extraction failures are rendered as envelopes too.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use credit_pool::{CustomGenerateParams, ExtendParams, GenerateParams, Studio};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::{Span, field, info, instrument, warn};

use crate::error::ApiError;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub studio: Arc<Studio>,
    pub always_ok: bool,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
    pub requests_total: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(studio: Arc<Studio>, always_ok: bool, prometheus: PrometheusHandle) -> Self {
        Self {
            studio,
            always_ok,
            prometheus,
            started_at: Instant::now(),
            requests_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count the request and tag the current span with a fresh request id.
    fn begin(&self) -> (String, Instant) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        Span::current().record("request_id", request_id.as_str());
        (request_id, Instant::now())
    }

    fn finish<T: Serialize>(
        &self,
        route: &'static str,
        request_id: &str,
        started: Instant,
        result: credit_pool::Result<T>,
    ) -> Response {
        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(value) => {
                crate::metrics::record_request(route, "ok", elapsed);
                info!(route, elapsed_ms = (elapsed * 1000.0) as u64, "request completed");
                Json(value).into_response()
            }
            Err(e) => {
                crate::metrics::record_request(route, "error", elapsed);
                warn!(route, kind = e.kind(), error = %e, "request failed");
                ApiError::from_pool(&e, request_id, self.always_ok).into_response()
            }
        }
    }

    fn reject(&self, route: &'static str, request_id: &str, message: String) -> Response {
        crate::metrics::record_request(route, "invalid", 0.0);
        warn!(route, error = %message, "rejected request");
        ApiError::invalid_request(message, request_id, self.always_ok).into_response()
    }
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateParams>, JsonRejection>,
) -> Response {
    let (request_id, started) = state.begin();
    let Json(params) = match body {
        Ok(body) => body,
        Err(e) => return state.reject("generate", &request_id, e.body_text()),
    };
    let result = state.studio.generate(params).await;
    state.finish("generate", &request_id, started, result)
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn custom_generate(
    State(state): State<AppState>,
    body: Result<Json<CustomGenerateParams>, JsonRejection>,
) -> Response {
    let (request_id, started) = state.begin();
    let Json(params) = match body {
        Ok(body) => body,
        Err(e) => return state.reject("custom_generate", &request_id, e.body_text()),
    };
    let result = state.studio.custom_generate(params).await;
    state.finish("custom_generate", &request_id, started, result)
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn extend_audio(
    State(state): State<AppState>,
    body: Result<Json<ExtendParams>, JsonRejection>,
) -> Response {
    let (request_id, started) = state.begin();
    let Json(params) = match body {
        Ok(body) => body,
        Err(e) => return state.reject("extend_audio", &request_id, e.body_text()),
    };
    let result = state.studio.extend(params).await;
    state.finish("extend_audio", &request_id, started, result)
}

#[derive(Debug, Deserialize)]
pub struct ConcatBody {
    pub clip_id: String,
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn concat(
    State(state): State<AppState>,
    body: Result<Json<ConcatBody>, JsonRejection>,
) -> Response {
    let (request_id, started) = state.begin();
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return state.reject("concat", &request_id, e.body_text()),
    };
    let result = state.studio.concatenate(&body.clip_id).await;
    state.finish("concat", &request_id, started, result)
}

#[derive(Debug, Deserialize)]
pub struct LyricsBody {
    pub prompt: String,
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn generate_lyrics(
    State(state): State<AppState>,
    body: Result<Json<LyricsBody>, JsonRejection>,
) -> Response {
    let (request_id, started) = state.begin();
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return state.reject("generate_lyrics", &request_id, e.body_text()),
    };
    let result = state.studio.generate_lyrics(&body.prompt).await;
    state.finish("generate_lyrics", &request_id, started, result)
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    pub ids: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
}

/// Split `a, b,,c` into ids, dropping blanks.
fn parse_ids(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn get_feed(
    State(state): State<AppState>,
    query: Result<Query<FeedQuery>, QueryRejection>,
) -> Response {
    let (request_id, started) = state.begin();
    let Query(query) = match query {
        Ok(query) => query,
        Err(e) => return state.reject("get", &request_id, e.body_text()),
    };
    let ids = parse_ids(query.ids.as_deref());
    let result = state.studio.get(&ids, query.page).await;
    state.finish("get", &request_id, started, result)
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn get_limit(State(state): State<AppState>) -> Response {
    let (request_id, started) = state.begin();
    let result = state.studio.get_limit().await;
    state.finish("get_limit", &request_id, started, result)
}

#[derive(Debug, Deserialize)]
pub struct ClipQuery {
    #[serde(default)]
    pub id: Option<String>,
}

#[instrument(skip_all, fields(request_id = field::Empty))]
pub async fn get_clip(
    State(state): State<AppState>,
    query: Result<Query<ClipQuery>, QueryRejection>,
) -> Response {
    let (request_id, started) = state.begin();
    let clip_id = match query {
        Ok(Query(ClipQuery { id: Some(id) })) if !id.trim().is_empty() => id,
        Ok(_) => return state.reject("clip", &request_id, "missing clip id".to_string()),
        Err(e) => return state.reject("clip", &request_id, e.body_text()),
    };
    let result = state.studio.get_clip(&clip_id).await;
    state.finish("clip", &request_id, started, result)
}

/// Health: active account, uptime, requests served.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.studio.controller().current().await;
    Json(serde_json::json!({
        "status": "healthy",
        "account": session.account(),
        "session_active": session.has_token().await,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": state.requests_total.load(Ordering::Relaxed),
    }))
}

/// Prometheus metrics endpoint in text exposition format.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
