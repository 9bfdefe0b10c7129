//! Request-time token freshness
//!
//! Called by the gate on every protected request. A token that is not about
//! to expire is returned without any network call. Otherwise the refresh
//! grant runs inline on the request task. Failures never reach the response:
//! the request carries on with no token and the page degrades.
//!
//! Refreshes for one user are serialized so two tabs hitting the gate at the
//! same moment don't both spend the refresh token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use credential_store::{CredentialStore, OAuthToken, User, UserId};
use spotify_auth::{OAuthConfig, now_millis};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::metrics;

#[derive(Clone)]
pub struct TokenLifecycleManager {
    store: Arc<dyn CredentialStore>,
    client: reqwest::Client,
    oauth: Arc<OAuthConfig>,
    margin: Duration,
    refresh_locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        client: reqwest::Client,
        oauth: Arc<OAuthConfig>,
        margin: Duration,
    ) -> Self {
        Self {
            store,
            client,
            oauth,
            margin,
            refresh_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return a usable token for `user`, refreshing it first if needed.
    ///
    /// `None` means either "never connected" or "refresh failed"; callers
    /// treat both the same way.
    pub async fn ensure_fresh(&self, user: &User) -> Option<OAuthToken> {
        let token = match self.store.find_token(user.id).await {
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(e) => {
                warn!(user_id = user.id, error = %e, "failed to load token");
                return None;
            }
        };

        if !self.needs_refresh(&token) {
            return Some(token);
        }

        let lock = self.lock_for(user.id).await;
        let _guard = lock.lock().await;

        // Another request may have refreshed while we waited
        let token = match self.store.find_token(user.id).await {
            Ok(Some(token)) if !self.needs_refresh(&token) => {
                debug!(user_id = user.id, "token refreshed by concurrent request");
                return Some(token);
            }
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(e) => {
                warn!(user_id = user.id, error = %e, "failed to reload token");
                return None;
            }
        };

        self.refresh(token).await
    }

    fn needs_refresh(&self, token: &OAuthToken) -> bool {
        token.expires_within(now_millis(), self.margin.as_millis() as u64)
    }

    async fn lock_for(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        // Drop locks nobody else holds a handle to
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(user_id).or_default().clone()
    }

    async fn refresh(&self, token: OAuthToken) -> Option<OAuthToken> {
        let user_id = token.user_id;
        let response =
            match spotify_auth::refresh_token(&self.client, &self.oauth, &token.refresh_token)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let outcome = if e.is_transient() {
                        "transport_error"
                    } else {
                        "rejected"
                    };
                    metrics::record_refresh(outcome);
                    warn!(user_id, error = %e, "token refresh failed, continuing without token");
                    return None;
                }
            };

        let now = now_millis();
        let refreshed = OAuthToken {
            user_id,
            expires_at: response.expires_at(now),
            access_token: response.access_token,
            // Provider may omit the refresh token on refresh
            refresh_token: response.refresh_token.unwrap_or(token.refresh_token),
            scope: response.scope.or(token.scope),
            updated_at: now,
        };

        if let Err(e) = self.store.upsert_token(refreshed.clone()).await {
            metrics::record_refresh("storage_error");
            warn!(user_id, error = %e, "failed to persist refreshed token");
            return None;
        }

        metrics::record_refresh("success");
        info!(user_id, expires_at = refreshed.expires_at, "token refreshed");
        Some(refreshed)
    }
}
