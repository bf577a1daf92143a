//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The studio cookie is loaded from the STUDIO_COOKIE env var or
//! cookie_file, never stored in the TOML directly.

use common::Secret;
use credit_pool::Thresholds;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use studio_client::{
    DelayRange, Endpoints, LyricsPollConfig, PollConfig, SessionConfig, constants,
    poller,
};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub failover: Thresholds,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Answer every request with HTTP 200, errors included, for clients that
    /// only inspect the JSON body.
    #[serde(default = "default_always_ok")]
    pub always_ok: bool,
}

/// Upstream endpoints and per-call timeouts
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_version_url")]
    pub version_url: String,
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_feed_timeout")]
    pub feed_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            version_url: default_version_url(),
            identity_url: default_identity_url(),
            api_url: default_api_url(),
            submit_timeout_secs: default_submit_timeout(),
            feed_timeout_secs: default_feed_timeout(),
        }
    }
}

/// Credential sources
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    /// JSON file holding candidates and the active pointer
    pub store_path: PathBuf,
    #[serde(skip)]
    pub cookie: Option<Secret<String>>,
    /// Path to a file containing the cookie (alternative to STUDIO_COOKIE)
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
    /// Label for the explicit cookie in logs and the store
    #[serde(default = "default_label")]
    pub label: String,
}

/// Poller timing, in seconds
#[derive(Debug, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_window")]
    pub window_secs: u64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_interval_min")]
    pub interval_min_secs: u64,
    #[serde(default = "default_interval_max")]
    pub interval_max_secs: u64,
    #[serde(default = "default_lyrics_interval")]
    pub lyrics_interval_secs: u64,
    /// Give up on lyrics after this long. Absent polls until complete.
    #[serde(default)]
    pub lyrics_window_secs: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window(),
            initial_delay_secs: default_initial_delay(),
            interval_min_secs: default_interval_min(),
            interval_max_secs: default_interval_max(),
            lyrics_interval_secs: default_lyrics_interval(),
            lyrics_window_secs: None,
        }
    }
}

/// Background token renewal. Absent interval disables it.
#[derive(Debug, Default, Deserialize)]
pub struct KeepaliveConfig {
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

fn default_max_connections() -> usize {
    100
}

fn default_always_ok() -> bool {
    true
}

fn default_version_url() -> String {
    constants::VERSION_URL.to_string()
}

fn default_identity_url() -> String {
    constants::IDENTITY_URL.to_string()
}

fn default_api_url() -> String {
    constants::API_URL.to_string()
}

fn default_submit_timeout() -> u64 {
    constants::SUBMIT_TIMEOUT_SECS
}

fn default_feed_timeout() -> u64 {
    constants::FEED_TIMEOUT_SECS
}

fn default_label() -> String {
    "configured".to_string()
}

fn default_window() -> u64 {
    poller::POLL_WINDOW_SECS
}

fn default_initial_delay() -> u64 {
    poller::INITIAL_DELAY_SECS
}

fn default_interval_min() -> u64 {
    poller::POLL_INTERVAL_SECS.0
}

fn default_interval_max() -> u64 {
    poller::POLL_INTERVAL_SECS.1
}

fn default_lyrics_interval() -> u64 {
    poller::LYRICS_INTERVAL_SECS
}

fn require_http(field: &'static str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::invalid(
            field,
            format!("must start with http:// or https://, got: {url}"),
        ))
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Cookie resolution order:
    /// 1. STUDIO_COOKIE env var
    /// 2. cookie_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(cookie) = std::env::var("STUDIO_COOKIE") {
            let cookie = cookie.trim().to_owned();
            if !cookie.is_empty() {
                config.credentials.cookie = Some(Secret::new(cookie));
            }
        } else if let Some(ref cookie_file) = config.credentials.cookie_file {
            let cookie = std::fs::read_to_string(cookie_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read cookie_file {}: {e}",
                    cookie_file.display()
                ))
            })?;
            let cookie = cookie.trim().to_owned();
            if !cookie.is_empty() {
                config.credentials.cookie = Some(Secret::new(cookie));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        require_http("upstream.version_url", &self.upstream.version_url)?;
        require_http("upstream.identity_url", &self.upstream.identity_url)?;
        require_http("upstream.api_url", &self.upstream.api_url)?;

        if self.upstream.submit_timeout_secs == 0 {
            return Err(common::Error::invalid(
                "upstream.submit_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.upstream.feed_timeout_secs == 0 {
            return Err(common::Error::invalid(
                "upstream.feed_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.proxy.max_connections == 0 {
            return Err(common::Error::invalid(
                "proxy.max_connections",
                "must be greater than 0",
            ));
        }
        if self.polling.window_secs == 0 {
            return Err(common::Error::invalid(
                "polling.window_secs",
                "must be greater than 0",
            ));
        }
        if self.polling.interval_min_secs > self.polling.interval_max_secs {
            return Err(common::Error::invalid(
                "polling.interval_min_secs",
                format!(
                    "{} exceeds interval_max_secs {}",
                    self.polling.interval_min_secs, self.polling.interval_max_secs
                ),
            ));
        }
        if self.keepalive.interval_secs == Some(0) {
            return Err(common::Error::invalid(
                "keepalive.interval_secs",
                "must be greater than 0 when set",
            ));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("studio-proxy.toml")
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoints: Endpoints {
                version_url: self.upstream.version_url.clone(),
                identity_url: self.upstream.identity_url.clone(),
                api_url: self.upstream.api_url.clone(),
            },
            submit_timeout: Duration::from_secs(self.upstream.submit_timeout_secs),
            feed_timeout: Duration::from_secs(self.upstream.feed_timeout_secs),
            ..SessionConfig::default()
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            window: Duration::from_secs(self.polling.window_secs),
            initial_delay: DelayRange::fixed(self.polling.initial_delay_secs),
            interval: DelayRange::between(
                self.polling.interval_min_secs,
                self.polling.interval_max_secs,
            ),
        }
    }

    pub fn lyrics_poll_config(&self) -> LyricsPollConfig {
        LyricsPollConfig {
            interval: Duration::from_secs(self.polling.lyrics_interval_secs),
            window: self.polling.lyrics_window_secs.map(Duration::from_secs),
        }
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive.interval_secs.map(Duration::from_secs)
    }
}
