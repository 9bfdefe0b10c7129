//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults.
//! The OAuth client secret is loaded from SPOTIFY_CLIENT_SECRET or
//! client_secret_file, never stored in the TOML directly to avoid leaking it.

use common::Secret;
use serde::Deserialize;
use spotify_auth::{
    API_BASE_URL, AUTHORIZE_ENDPOINT, DEFAULT_SCOPES, OAuthConfig, OEMBED_ENDPOINT,
    STATE_MAX_AGE_SECS, TOKEN_ENDPOINT,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CLIENT_ID: &str = "SPOTIFY_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "SPOTIFY_CLIENT_SECRET";
pub const ENV_REDIRECT_URL: &str = "REDIRECT_URL";
pub const ENV_STATE_SIGNING_KEY: &str = "STATE_SIGNING_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Session lifetime settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session is discarded
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// OAuth client registration and token handling
#[derive(Debug, Deserialize)]
pub struct OAuthSettings {
    /// Overridden by SPOTIFY_CLIENT_ID
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to SPOTIFY_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    /// Overridden by REDIRECT_URL
    #[serde(default)]
    pub redirect_url: Option<String>,
    /// From STATE_SIGNING_KEY; a random per-process key is used when unset
    #[serde(skip)]
    pub state_signing_key: Option<Secret<String>>,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Bound on every outbound call to the provider
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Refresh when the access token expires within this window
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
    #[serde(default = "default_state_max_age")]
    pub state_max_age_secs: u64,
}

/// Credential file location
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

/// Catalog API used for the embed widget on /hello
#[derive(Debug, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_oembed_url")]
    pub oembed_url: String,
}

fn default_max_connections() -> usize {
    1000
}

fn default_session_ttl() -> u64 {
    86_400
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_authorize_url() -> String {
    AUTHORIZE_ENDPOINT.to_string()
}

fn default_token_url() -> String {
    TOKEN_ENDPOINT.to_string()
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

fn default_timeout() -> u64 {
    10
}

fn default_refresh_margin() -> u64 {
    60
}

fn default_state_max_age() -> u64 {
    STATE_MAX_AGE_SECS
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_api_base_url() -> String {
    API_BASE_URL.to_string()
}

fn default_oembed_url() -> String {
    OEMBED_ENDPOINT.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            client_secret_file: None,
            redirect_url: None,
            state_signing_key: None,
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
            timeout_secs: default_timeout(),
            refresh_margin_secs: default_refresh_margin(),
            state_max_age_secs: default_state_max_age(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            oembed_url: default_oembed_url(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents, |key| std::env::var(key).ok())
    }

    /// Parse, overlay values from `env`, and validate.
    ///
    /// Client secret resolution order:
    /// 1. SPOTIFY_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn from_toml<F>(contents: &str, env: F) -> common::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = toml::from_str(contents)?;

        if let Some(id) = env(ENV_CLIENT_ID) {
            config.oauth.client_id = Some(id);
        }
        if let Some(url) = env(ENV_REDIRECT_URL) {
            config.oauth.redirect_url = Some(url);
        }
        if let Some(secret) = env(ENV_CLIENT_SECRET) {
            config.oauth.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.oauth.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.oauth.client_secret = Some(Secret::new(secret));
            }
        }
        if let Some(key) = env(ENV_STATE_SIGNING_KEY).filter(|k| !k.is_empty()) {
            config.oauth.state_signing_key = Some(Secret::new(key));
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.oauth.client_id.as_deref().is_none_or(str::is_empty) {
            return Err(common::Error::MissingEnv(ENV_CLIENT_ID));
        }
        if self.oauth.client_secret.is_none() {
            return Err(common::Error::MissingEnv(ENV_CLIENT_SECRET));
        }
        match self.oauth.redirect_url.as_deref() {
            None | Some("") => return Err(common::Error::MissingEnv(ENV_REDIRECT_URL)),
            Some(url) => require_http_url("redirect_url", url)?,
        }
        require_http_url("oauth.authorize_url", &self.oauth.authorize_url)?;
        require_http_url("oauth.token_url", &self.oauth.token_url)?;
        require_http_url("catalog.api_base_url", &self.catalog.api_base_url)?;
        require_http_url("catalog.oembed_url", &self.catalog.oembed_url)?;

        for (name, value) in [
            ("oauth.timeout_secs", self.oauth.timeout_secs),
            ("oauth.state_max_age_secs", self.oauth.state_max_age_secs),
            ("session.ttl_secs", self.session.ttl_secs),
            ("session.sweep_interval_secs", self.session.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(common::Error::Config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.oauth.scopes.is_empty() {
            return Err(common::Error::Config(
                "oauth.scopes must name at least one scope".into(),
            ));
        }
        Ok(())
    }

    /// Client registration for the token and authorize endpoints.
    pub fn oauth_config(&self) -> common::Result<OAuthConfig> {
        let client_id = self
            .oauth
            .client_id
            .clone()
            .ok_or(common::Error::MissingEnv(ENV_CLIENT_ID))?;
        let client_secret = self
            .oauth
            .client_secret
            .clone()
            .ok_or(common::Error::MissingEnv(ENV_CLIENT_SECRET))?;
        let redirect_url = self
            .oauth
            .redirect_url
            .clone()
            .ok_or(common::Error::MissingEnv(ENV_REDIRECT_URL))?;

        let mut config = OAuthConfig::spotify(client_id, client_secret, redirect_url);
        config.authorize_url = self.oauth.authorize_url.clone();
        config.token_url = self.oauth.token_url.clone();
        config.scopes = self.oauth.scopes.clone();
        Ok(config)
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_secs(self.oauth.timeout_secs)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("connect-gateway.toml")
    }
}

fn require_http_url(name: &str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{name} must start with http:// or https://, got: {value}"
        )))
    }
}
