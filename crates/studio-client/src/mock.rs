//! In-process mock of the studio and its identity provider
//!
//! Serves every upstream route on one `127.0.0.1:0` listener. Accounts are
//! keyed by cookie; bearer tokens encode the session id so billing, feed and
//! generation calls can be attributed to the account that made them.
//!
//! Available to other crates' tests through the `test-util` feature.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::delay::DelayRange;
use crate::session::{Endpoints, SessionConfig};

/// Version string the mock reports as latest.
pub const MOCK_CLIENT_VERSION: &str = "5.35.1";

#[derive(Debug, Clone)]
struct Account {
    cookie: String,
    session_id: String,
    credits: Option<i64>,
    fail_renew: bool,
    fail_billing: bool,
}

/// One recorded studio API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub route: &'static str,
    pub session_id: Option<String>,
}

#[derive(Debug)]
struct MockState {
    version: Option<String>,
    accounts: Vec<Account>,
    feed_script: VecDeque<Vec<String>>,
    fail_feed: bool,
    fail_generation: bool,
    billing_delay: Duration,
    failing_lyrics_polls: u32,
    renewals: usize,
    token_seq: u64,
    next_clip: u64,
    calls: Vec<MockCall>,
    last_generate_body: Option<Value>,
    lyrics_pending_polls: u32,
    lyrics: HashMap<String, (String, u32)>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            version: Some(MOCK_CLIENT_VERSION.to_string()),
            accounts: Vec::new(),
            feed_script: VecDeque::new(),
            fail_feed: false,
            fail_generation: false,
            billing_delay: Duration::ZERO,
            failing_lyrics_polls: 0,
            renewals: 0,
            token_seq: 0,
            next_clip: 0,
            calls: Vec::new(),
            last_generate_body: None,
            lyrics_pending_polls: 0,
            lyrics: HashMap::new(),
        }
    }
}

type Shared = Arc<Mutex<MockState>>;

fn lock(state: &Shared) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running mock studio. The server stops when dropped.
pub struct MockStudio {
    url: String,
    state: Shared,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for MockStudio {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl MockStudio {
    /// Bind an ephemeral port and start serving.
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState::default()));
        let app = Router::new()
            .route("/version", get(version))
            .route("/v1/client", get(client))
            .route("/v1/client/sessions/{sid}/tokens", post(tokens))
            .route("/api/billing/info/", get(billing))
            .route("/api/generate/v2/", post(generate))
            .route("/api/feed/", get(feed))
            .route("/api/generate/concat/v2/", post(concat))
            .route("/api/generate/lyrics/", post(lyrics_submit))
            .route("/api/generate/lyrics/{id}", get(lyrics_get))
            .route("/api/clip/{id}", get(clip))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock studio listener");
        let addr = listener.local_addr().expect("mock studio local addr");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{addr}"),
            state,
            server,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            version_url: format!("{}/version", self.url),
            identity_url: self.url.clone(),
            api_url: self.url.clone(),
        }
    }

    /// Session settings pointing at this mock with every pause set to zero.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoints: self.endpoints(),
            submit_timeout: Duration::from_secs(5),
            feed_timeout: Duration::from_secs(5),
            renew_delay: DelayRange::fixed(0),
        }
    }

    /// Register an account. `credits: None` makes billing omit the field.
    pub fn add_account(&self, cookie: &str, session_id: &str, credits: Option<i64>) {
        let mut state = lock(&self.state);
        state.accounts.retain(|a| a.cookie != cookie);
        state.accounts.push(Account {
            cookie: cookie.to_string(),
            session_id: session_id.to_string(),
            credits,
            fail_renew: false,
            fail_billing: false,
        });
    }

    pub fn set_credits(&self, session_id: &str, credits: Option<i64>) {
        self.with_account(session_id, |a| a.credits = credits);
    }

    pub fn fail_renewals(&self, session_id: &str, fail: bool) {
        self.with_account(session_id, |a| a.fail_renew = fail);
    }

    pub fn fail_billing(&self, session_id: &str, fail: bool) {
        self.with_account(session_id, |a| a.fail_billing = fail);
    }

    /// Hold every billing response for `delay` before answering.
    pub fn delay_billing(&self, delay: Duration) {
        lock(&self.state).billing_delay = delay;
    }

    pub fn set_version(&self, version: Option<&str>) {
        lock(&self.state).version = version.map(str::to_string);
    }

    /// Statuses returned by successive feed calls, one entry per poll and one
    /// status per requested id (cycled). The last entry repeats forever.
    pub fn set_feed_script(&self, script: Vec<Vec<&str>>) {
        lock(&self.state).feed_script = script
            .into_iter()
            .map(|poll| poll.into_iter().map(str::to_string).collect())
            .collect();
    }

    pub fn fail_feed(&self, fail: bool) {
        lock(&self.state).fail_feed = fail;
    }

    pub fn fail_generation(&self, fail: bool) {
        lock(&self.state).fail_generation = fail;
    }

    /// Lyrics jobs report `running` for this many polls before completing.
    pub fn set_lyrics_pending_polls(&self, polls: u32) {
        lock(&self.state).lyrics_pending_polls = polls;
    }

    /// The next `polls` lyrics status requests answer 500.
    pub fn fail_lyrics_polls(&self, polls: u32) {
        lock(&self.state).failing_lyrics_polls = polls;
    }

    pub fn renewal_count(&self) -> usize {
        lock(&self.state).renewals
    }

    pub fn feed_calls(&self) -> usize {
        self.sessions_for("feed").len()
    }

    /// Session ids that called `route`, in call order.
    pub fn sessions_for(&self, route: &str) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| c.route == route)
            .map(|c| c.session_id.clone().unwrap_or_default())
            .collect()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state).calls.clone()
    }

    pub fn last_generate_body(&self) -> Option<Value> {
        lock(&self.state).last_generate_body.clone()
    }

    fn with_account(&self, session_id: &str, f: impl FnOnce(&mut Account)) {
        let mut state = lock(&self.state);
        if let Some(account) = state.accounts.iter_mut().find(|a| a.session_id == session_id) {
            f(account);
        }
    }
}

/// Session id encoded in a `jwt.<sid>.<seq>` bearer token.
fn bearer_session(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    token.split('.').nth(1).map(str::to_string)
}

fn record(state: &mut MockState, route: &'static str, headers: &HeaderMap) {
    state.calls.push(MockCall {
        route,
        session_id: bearer_session(headers),
    });
}

fn clip_json(id: &str, status: &str, body: Option<&Value>) -> Value {
    let field = |name: &str| body.and_then(|b| b.get(name)).cloned().unwrap_or(Value::Null);
    json!({
        "id": id,
        "title": field("title"),
        "status": status,
        "model_name": field("mv"),
        "audio_url": format!("https://cdn.mock/{id}.mp3"),
        "created_at": "2026-01-01T00:00:00Z",
        "metadata": {
            "prompt": field("prompt"),
            "gpt_description_prompt": field("gpt_description_prompt"),
            "tags": field("tags"),
            "negative_tags": field("negative_tags"),
            "type": "gen",
        }
    })
}

async fn version(State(state): State<Shared>) -> Json<Value> {
    match lock(&state).version.clone() {
        Some(v) => Json(json!({ "tags": { "latest": v } })),
        None => Json(json!({ "tags": {} })),
    }
}

async fn client(State(state): State<Shared>, headers: HeaderMap) -> Json<Value> {
    let cookie = headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let state = lock(&state);
    match state.accounts.iter().find(|a| a.cookie == cookie) {
        Some(account) => Json(json!({
            "response": { "last_active_session_id": account.session_id }
        })),
        None => Json(json!({ "response": null })),
    }
}

async fn tokens(State(state): State<Shared>, Path(sid): Path<String>) -> Response {
    let mut state = lock(&state);
    let Some(account) = state.accounts.iter().find(|a| a.session_id == sid).cloned() else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };
    if account.fail_renew {
        return (StatusCode::UNAUTHORIZED, "session revoked").into_response();
    }
    state.renewals += 1;
    state.token_seq += 1;
    Json(json!({ "jwt": format!("jwt.{sid}.{}", state.token_seq) })).into_response()
}

async fn billing(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let delay = lock(&state).billing_delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let mut state = lock(&state);
    record(&mut state, "billing", &headers);
    let sid = bearer_session(&headers).unwrap_or_default();
    let Some(account) = state.accounts.iter().find(|a| a.session_id == sid) else {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    };
    if account.fail_billing {
        return (StatusCode::INTERNAL_SERVER_ERROR, "billing unavailable").into_response();
    }
    let mut body = json!({ "period": "month", "monthly_limit": 500, "monthly_usage": 0 });
    if let Some(credits) = account.credits {
        body["total_credits_left"] = json!(credits);
    }
    Json(body).into_response()
}

async fn generate(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = lock(&state);
    record(&mut state, "generate", &headers);
    if state.fail_generation {
        return (StatusCode::BAD_GATEWAY, "generation backend down").into_response();
    }
    state.last_generate_body = Some(body.clone());
    let clips: Vec<Value> = (0..2)
        .map(|_| {
            state.next_clip += 1;
            clip_json(&format!("clip-{}", state.next_clip), "submitted", Some(&body))
        })
        .collect();
    Json(json!({ "clips": clips })).into_response()
}

async fn feed(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut state = lock(&state);
    record(&mut state, "feed", &headers);
    if state.fail_feed {
        return (StatusCode::INTERNAL_SERVER_ERROR, "feed unavailable").into_response();
    }

    let ids: Vec<String> = match query.get("ids") {
        Some(ids) => ids.split(',').map(str::to_string).collect(),
        None => vec!["feed-1".to_string(), "feed-2".to_string()],
    };
    let statuses = if state.feed_script.len() > 1 {
        state.feed_script.pop_front().unwrap_or_default()
    } else {
        state.feed_script.front().cloned().unwrap_or_default()
    };

    let clips: Vec<Value> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let status = if statuses.is_empty() {
                "complete"
            } else {
                statuses[i % statuses.len()].as_str()
            };
            clip_json(id, status, None)
        })
        .collect();
    Json(Value::Array(clips)).into_response()
}

async fn concat(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut state = lock(&state);
    record(&mut state, "concat", &headers);
    let clip_id = body["clip_id"].as_str().unwrap_or_default();
    Json(clip_json(&format!("concat-{clip_id}"), "complete", None))
}

async fn lyrics_submit(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut state = lock(&state);
    record(&mut state, "lyrics", &headers);
    let id = format!("lyrics-{}", state.lyrics.len() + 1);
    let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
    state.lyrics.insert(id.clone(), (prompt, 0));
    Json(json!({ "id": id }))
}

async fn lyrics_get(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = lock(&state);
    if state.failing_lyrics_polls > 0 {
        state.failing_lyrics_polls -= 1;
        return (StatusCode::INTERNAL_SERVER_ERROR, "lyrics unavailable").into_response();
    }
    let pending = state.lyrics_pending_polls;
    let Some((prompt, polls)) = state.lyrics.get_mut(&id) else {
        return (StatusCode::NOT_FOUND, "unknown lyrics job").into_response();
    };
    *polls = polls.saturating_add(1);
    if *polls > pending {
        Json(json!({
            "text": format!("[Verse]\n{prompt}"),
            "title": "Generated",
            "status": "complete"
        }))
        .into_response()
    } else {
        Json(json!({ "text": "", "title": "", "status": "running" })).into_response()
    }
}

async fn clip(Path(id): Path<String>) -> Json<Value> {
    Json(json!({ "id": id, "status": "complete" }))
}
