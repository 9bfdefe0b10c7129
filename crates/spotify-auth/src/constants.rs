//! Spotify OAuth constants
//!
//! Public endpoint locations and scope defaults. The client id, client secret
//! and redirect URL are deployment-specific and come from the environment.

/// Authorization endpoint the browser is redirected to
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.spotify.com/authorize";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://accounts.spotify.com/api/token";

/// Web API base for catalog calls made with the user's access token
pub const API_BASE_URL: &str = "https://api.spotify.com/v1";

/// oEmbed endpoint that turns a track URL into an embeddable widget
pub const OEMBED_ENDPOINT: &str = "https://open.spotify.com/oembed";

/// Scope needed to read the user's saved tracks.
pub const DEFAULT_SCOPES: &[&str] = &["user-library-read"];

/// Cookie carrying the signed CSRF state between connect and callback
pub const STATE_COOKIE: &str = "oauthstate";

/// Maximum age of a CSRF state before the callback rejects it.
pub const STATE_MAX_AGE_SECS: u64 = 600; // 10 minutes
