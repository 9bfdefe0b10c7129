//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (callback completion)
//! 2. Token refresh (request-time, when the access token is about to expire)
//!
//! Both POST form bodies to the configured token URL, authenticating the
//! client with HTTP Basic credentials. Request timeouts come from the
//! `reqwest::Client` the caller builds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::OAuthConfig;
use crate::error::{Error, Result};

/// Extra attempts made after a transient transport failure.
const MAX_RETRIES: u32 = 2;

/// Fixed delay between retry attempts.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. Refresh
/// responses may omit `refresh_token`, in which case the caller keeps the one
/// it already holds.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry in unix milliseconds, relative to `now_millis`.
    /// Saturates instead of overflowing on absurd `expires_in` values.
    pub fn expires_at(&self, now_millis: u64) -> u64 {
        now_millis.saturating_add(self.expires_in.saturating_mul(1000))
    }
}

/// Current time as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Exchange an authorization code for tokens.
///
/// Codes are single-use at the provider, so this is never retried: a
/// transport failure after the provider consumed the code would turn a retry
/// into a guaranteed rejection.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
) -> Result<TokenResponse> {
    post_token_form(
        client,
        config,
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", config.redirect_url.as_str()),
        ],
        "token exchange",
    )
    .await
}

/// Refresh an access token using a refresh token.
///
/// Transient transport failures are retried up to `MAX_RETRIES` times with a
/// fixed backoff. Provider rejections return immediately.
pub async fn refresh_token(
    client: &reqwest::Client,
    config: &OAuthConfig,
    refresh: &str,
) -> Result<TokenResponse> {
    let form = [("grant_type", "refresh_token"), ("refresh_token", refresh)];

    let mut attempt = 0u32;
    loop {
        match post_token_form(client, config, &form, "token refresh").await {
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                attempt += 1;
                warn!(attempt, error = %e, "retrying token refresh after transient failure");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            result => return result,
        }
    }
}

async fn post_token_form(
    client: &reqwest::Client,
    config: &OAuthConfig,
    form: &[(&str, &str)],
    context: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&config.token_url)
        .basic_auth(&config.client_id, Some(config.client_secret.expose_str()))
        .form(form)
        .send()
        .await
        .map_err(|e| Error::from_transport(context, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // 400 invalid_grant / 401 invalid_client / 403: the grant itself is bad
        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Err(Error::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        return Err(Error::TokenExchange(format!(
            "{context} returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid {context} response: {e}")))
}
