//! Session lifecycle against the cookie-based identity provider
//!
//! A `Session` is bound to exactly one credential. It is only ever handed out
//! fully initialized: client version resolved, session id established, and a
//! first bearer token issued. There is no partially-built session value.
//!
//! Initialization sequence (each step gates the next):
//! 1. Version lookup → `VersionLookup` if no latest tag is present
//! 2. "Current client" call with the cookie → `SessionEstablish` if the
//!    response has no active session id (credential invalid or expired)
//! 3. First token renewal → `AuthInit` on failure
//!
//! After that the bearer token is the only mutable part and is replaced on
//! every `renew`.

use std::time::Duration;

use common::Secret;
use credential_store::Credential;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::constants::{
    API_URL, FEED_TIMEOUT_SECS, IDENTITY_URL, RENEW_DELAY_SECS, SUBMIT_TIMEOUT_SECS, USER_AGENT,
    VERSION_URL,
};
use crate::delay::DelayRange;
use crate::error::{Error, Result};
use crate::models::{BillingInfo, QuotaSnapshot};

/// Base URLs for the three upstream services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub version_url: String,
    pub identity_url: String,
    pub api_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            version_url: VERSION_URL.to_string(),
            identity_url: IDENTITY_URL.to_string(),
            api_url: API_URL.to_string(),
        }
    }
}

impl Endpoints {
    pub(crate) fn api(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }

    fn identity(&self, path: &str) -> String {
        format!("{}{}", self.identity_url.trim_end_matches('/'), path)
    }
}

/// Settings shared by every session a connector creates.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoints: Endpoints,
    pub submit_timeout: Duration,
    pub feed_timeout: Duration,
    /// Pause taken after a blocking renewal.
    pub renew_delay: DelayRange,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            submit_timeout: Duration::from_secs(SUBMIT_TIMEOUT_SECS),
            feed_timeout: Duration::from_secs(FEED_TIMEOUT_SECS),
            renew_delay: DelayRange::between(RENEW_DELAY_SECS.0, RENEW_DELAY_SECS.1),
        }
    }
}

/// Stands up sessions for credentials. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Connector {
    http: reqwest::Client,
    config: SessionConfig,
}

impl Connector {
    pub fn new(http: reqwest::Client, config: SessionConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Initialize a session bound to `credential`.
    pub async fn connect(&self, credential: Credential) -> Result<Session> {
        Session::initialize(self.http.clone(), self.config.clone(), credential).await
    }
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    tags: Option<VersionTags>,
}

#[derive(Debug, Deserialize)]
struct VersionTags {
    #[serde(default)]
    latest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientResponse {
    #[serde(default)]
    response: Option<ClientState>,
}

#[derive(Debug, Deserialize)]
struct ClientState {
    #[serde(default)]
    last_active_session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    jwt: Option<String>,
}

/// Live authenticated context for one credential.
pub struct Session {
    http: reqwest::Client,
    config: SessionConfig,
    credential: Credential,
    client_version: String,
    session_id: String,
    token: RwLock<Secret<String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.credential.label)
            .field("client_version", &self.client_version)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Run the full initialization sequence for `credential`.
    #[instrument(skip_all, fields(account = %credential.label))]
    pub async fn initialize(
        http: reqwest::Client,
        config: SessionConfig,
        credential: Credential,
    ) -> Result<Session> {
        let client_version = lookup_client_version(&http, &config.endpoints).await?;
        debug!(client_version, "resolved identity client version");

        let session_id =
            establish_session(&http, &config.endpoints, &client_version, &credential).await?;

        let session = Session {
            http,
            config,
            credential,
            client_version,
            session_id,
            token: RwLock::new(Secret::new(String::new())),
        };

        session
            .renew(false)
            .await
            .map_err(|e| Error::AuthInit(format!("initial token renewal: {e}")))?;

        info!(session_id = %session.session_id, "session initialized");
        Ok(session)
    }

    /// Obtain a fresh bearer token.
    ///
    /// With `blocking_delay` the call additionally waits a randomized pause
    /// after the renewal so back-to-back studio calls are spaced out.
    pub async fn renew(&self, blocking_delay: bool) -> Result<()> {
        if self.session_id.is_empty() {
            return Err(Error::TokenRenew("no session id established".into()));
        }

        let url = self.config.endpoints.identity(&format!(
            "/v1/client/sessions/{}/tokens",
            self.session_id
        ));
        let response = self
            .http
            .post(&url)
            .query(&[
                ("_is_native", "true"),
                ("_clerk_js_version", self.client_version.as_str()),
            ])
            .header(reqwest::header::COOKIE, self.credential.secret.expose())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| Error::TokenRenew(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::TokenRenew(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenRenew(format!("invalid token response: {e}")))?
            .jwt
            .filter(|jwt| !jwt.is_empty())
            .ok_or_else(|| Error::TokenRenew("token response has no jwt".into()))?;

        *self.token.write().await = Secret::new(token);
        debug!(account = %self.credential.label, "bearer token renewed");

        if blocking_delay {
            self.config.renew_delay.sleep().await;
        }
        Ok(())
    }

    /// Query remaining credits.
    ///
    /// Renews first unless the caller vouches that the token is `fresh`. Any
    /// failure on the way, the renewal included, is a `QuotaQuery` error and
    /// must never be read as "enough credits".
    pub async fn quota(&self, fresh: bool) -> Result<QuotaSnapshot> {
        if !fresh {
            self.renew(false)
                .await
                .map_err(|e| Error::QuotaQuery(format!("renewing before billing query: {e}")))?;
        }

        let response = self
            .authorized(reqwest::Method::GET, "/api/billing/info/")
            .await
            .send()
            .await
            .map_err(|e| Error::QuotaQuery(format!("billing request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::QuotaQuery(format!("billing endpoint returned {status}")));
        }

        let info = response
            .json::<BillingInfo>()
            .await
            .map_err(|e| Error::QuotaQuery(format!("invalid billing response: {e}")))?;
        Ok(info.into())
    }

    /// Request builder for a studio API path carrying the current bearer token.
    pub(crate) async fn authorized(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> reqwest::RequestBuilder {
        let token = self.token.read().await;
        self.http
            .request(method, self.config.endpoints.api(path))
            .bearer_auth(token.expose())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn account(&self) -> &str {
        &self.credential.label
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn client_version(&self) -> &str {
        &self.client_version
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a bearer token has been issued. Always true for a session
    /// returned by `initialize`.
    pub async fn has_token(&self) -> bool {
        !self.token.read().await.is_empty()
    }
}

async fn lookup_client_version(http: &reqwest::Client, endpoints: &Endpoints) -> Result<String> {
    let response = http
        .get(&endpoints.version_url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(|e| Error::VersionLookup(format!("version request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::VersionLookup(format!(
            "version endpoint returned {status}"
        )));
    }

    response
        .json::<VersionResponse>()
        .await
        .map_err(|e| Error::VersionLookup(format!("invalid version response: {e}")))?
        .tags
        .and_then(|tags| tags.latest)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::VersionLookup("response has no latest version tag".into()))
}

async fn establish_session(
    http: &reqwest::Client,
    endpoints: &Endpoints,
    client_version: &str,
    credential: &Credential,
) -> Result<String> {
    let response = http
        .get(endpoints.identity("/v1/client"))
        .query(&[("_is_native", "true"), ("_clerk_js_version", client_version)])
        .header(reqwest::header::COOKIE, credential.secret.expose())
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(|e| Error::SessionEstablish(format!("client request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::SessionEstablish(format!(
            "identity provider returned {status}"
        )));
    }

    response
        .json::<ClientResponse>()
        .await
        .map_err(|e| Error::SessionEstablish(format!("invalid client response: {e}")))?
        .response
        .and_then(|state| state.last_active_session_id)
        .filter(|sid| !sid.is_empty())
        .ok_or_else(|| {
            Error::SessionEstablish("no active session id, cookie invalid or expired".into())
        })
}
