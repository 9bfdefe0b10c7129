//! Stored record types

use serde::{Deserialize, Serialize};

/// Primary key of a user row.
pub type UserId = u64;

/// A registered gateway user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// PHC-format password hash; never the plaintext
    pub password_hash: String,
    /// Unix timestamp in milliseconds
    pub created_at: u64,
}

/// The provider token held for one user.
///
/// `expires_at` is a unix timestamp in milliseconds (absolute, not a delta),
/// computed from the token endpoint's `expires_in` at storage time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub user_id: UserId,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: u64,
    #[serde(default)]
    pub scope: Option<String>,
    pub updated_at: u64,
}

impl OAuthToken {
    /// Whether the access token is expired, or will be within `margin_millis`.
    pub fn expires_within(&self, now_millis: u64, margin_millis: u64) -> bool {
        self.expires_at <= now_millis.saturating_add(margin_millis)
    }
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("user_id", &self.user_id)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}
