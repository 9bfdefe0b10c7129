//! OAuth client registration
//!
//! Everything the gateway needs to talk to the provider on behalf of one
//! registered client application: identity, secret, redirect target, and the
//! two endpoints. Endpoints are overridable so tests can point them at a local
//! mock server.

use common::Secret;
use reqwest::Url;

use crate::constants::{AUTHORIZE_ENDPOINT, DEFAULT_SCOPES, TOKEN_ENDPOINT};
use crate::error::{Error, Result};

/// Client registration for the Authorization-Code grant.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    /// Must match one of the redirect URIs registered with the provider
    pub redirect_url: String,
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    /// Registration against the public Spotify endpoints with default scopes.
    pub fn spotify(client_id: String, client_secret: Secret<String>, redirect_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_url,
            authorize_url: AUTHORIZE_ENDPOINT.to_string(),
            token_url: TOKEN_ENDPOINT.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Build the authorize URL the browser is sent to.
    ///
    /// `state` is echoed back unchanged by the provider on the callback.
    pub fn authorization_url(&self, state: &str) -> Result<String> {
        let scope = self.scopes.join(" ");
        let url = Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.redirect_url.as_str()),
                ("scope", scope.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| Error::InvalidUrl(format!("authorize_url {}: {e}", self.authorize_url)))?;
        Ok(url.into())
    }
}
