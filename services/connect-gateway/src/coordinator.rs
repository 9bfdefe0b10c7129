//! Authorization-Code coordinator
//!
//! Executes the actions of the flow state machine in `flow.rs`: issues signed
//! state values, sends the browser to the provider, and on callback checks the
//! state, exchanges the code and stores the token against the signed-in user.
//!
//! The browser carries the pending state in the `oauthstate` cookie. Each
//! state is signed together with the initiating user's id, so a callback only
//! completes for the user who started the flow. The only server-side record is
//! the ledger of consumed states, which makes each state single-use. Entries
//! are claimed when the state verifies and released again if the exchange or
//! store step fails, so concurrent replays of one callback cannot both reach
//! the token endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use credential_store::{CredentialStore, OAuthToken, User};
use serde::Deserialize;
use spotify_auth::{
    OAuthConfig, STATE_COOKIE, StateError, StateSigner, TokenResponse, now_millis,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::AppError;
use crate::flow::{self, AbortReason, FlowAction, FlowEvent, FlowState, StateRejection};
use crate::gate::RequestContext;
use crate::metrics;
use crate::pages::{HOME_PATH, redirect_found};

/// Query parameters the provider appends to the redirect URL.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    /// Set instead of `code` when the user refused consent
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct OAuth2Coordinator {
    client: reqwest::Client,
    oauth: Arc<OAuthConfig>,
    store: Arc<dyn CredentialStore>,
    signer: StateSigner,
    state_max_age: Duration,
    /// Consumed state value -> issued_at (unix seconds)
    consumed: Arc<Mutex<HashMap<String, u64>>>,
}

impl OAuth2Coordinator {
    pub fn new(
        client: reqwest::Client,
        oauth: Arc<OAuthConfig>,
        store: Arc<dyn CredentialStore>,
        signer: StateSigner,
        state_max_age: Duration,
    ) -> Self {
        Self {
            client,
            oauth,
            store,
            signer,
            state_max_age,
            consumed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a flow for `user`. Returns the state value for the cookie and the
    /// authorize URL to redirect to.
    pub fn initiate(&self, user: &User) -> Result<(String, String), AppError> {
        let issued = self.signer.issue(user.id);
        let (_, action) = flow::handle_event(
            FlowState::Idle,
            FlowEvent::Initiated {
                state: issued.value,
            },
        );
        let FlowAction::RedirectToProvider { state } = action else {
            return Err(AppError::Internal(format!(
                "unexpected action on initiate: {action:?}"
            )));
        };
        let url = self
            .oauth
            .authorization_url(&state)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        debug!(user_id = user.id, "authorization flow initiated");
        Ok((state, url))
    }

    /// Finish a flow from the provider's callback.
    ///
    /// `cookie_state` is the value of the `oauthstate` cookie, if present.
    pub async fn complete(
        &self,
        user: &User,
        cookie_state: Option<&str>,
        params: CallbackParams,
    ) -> Result<(), AppError> {
        let mut state = flow::resume(cookie_state);
        let mut event = FlowEvent::CallbackReceived {
            query_state: params.state,
            code: params.code,
            provider_error: params.error,
        };
        let mut claimed: Option<String> = None;
        let mut response: Option<(TokenResponse, String)> = None;
        let mut failure: Option<AppError> = None;

        loop {
            let (next, action) = flow::handle_event(state, event);
            state = next;

            event = match action {
                FlowAction::VerifyState { state: value } => {
                    let verdict = self.verify_and_claim(&value, user.id).await;
                    if verdict.is_ok() {
                        claimed = Some(value);
                    }
                    FlowEvent::StateVerified(verdict)
                }
                FlowAction::ExchangeCode { code } => {
                    match spotify_auth::exchange_code(&self.client, &self.oauth, &code).await {
                        // The code grant must return a refresh token
                        Ok(mut r) => match r.refresh_token.take() {
                            Some(refresh) => {
                                response = Some((r, refresh));
                                FlowEvent::Exchanged
                            }
                            None => {
                                failure = Some(AppError::Exchange(
                                    spotify_auth::Error::TokenExchange(
                                        "token response has no refresh_token".into(),
                                    ),
                                ));
                                FlowEvent::ExchangeFailed
                            }
                        },
                        Err(e) => {
                            failure = Some(AppError::Exchange(e));
                            FlowEvent::ExchangeFailed
                        }
                    }
                }
                FlowAction::PersistToken => {
                    let Some((r, refresh_token)) = response.take() else {
                        return Err(AppError::Internal("persist without token".into()));
                    };
                    let now = now_millis();
                    let token = OAuthToken {
                        user_id: user.id,
                        expires_at: r.expires_at(now),
                        access_token: r.access_token,
                        refresh_token,
                        scope: r.scope,
                        updated_at: now,
                    };
                    match self.store.upsert_token(token).await {
                        Ok(()) => FlowEvent::TokenStored,
                        Err(e) => {
                            failure = Some(AppError::Storage(e));
                            FlowEvent::StoreFailed
                        }
                    }
                }
                FlowAction::Finish => {
                    metrics::record_callback("success");
                    info!(user_id = user.id, "account connected");
                    return Ok(());
                }
                FlowAction::Abort(reason) => {
                    if let Some(value) = claimed.take() {
                        self.release(&value).await;
                    }
                    metrics::record_callback(outcome_label(&reason));
                    warn!(user_id = user.id, ?reason, "authorization callback aborted");
                    return Err(failure.unwrap_or_else(|| reason_error(reason)));
                }
                FlowAction::RedirectToProvider { .. } => {
                    return Err(AppError::Internal(
                        "unexpected redirect during callback".into(),
                    ));
                }
            };
        }
    }

    /// Check signature, owner and age, then mark the state as used.
    async fn verify_and_claim(&self, value: &str, user_id: u64) -> Result<(), StateRejection> {
        let issued = match self.signer.verify(value, user_id, self.state_max_age) {
            Ok(issued) => issued,
            Err(StateError::Expired { age_secs }) => {
                debug!(age_secs, "state expired");
                return Err(StateRejection::Expired);
            }
            Err(StateError::WrongUser) => {
                warn!(user_id, "state was issued to a different user");
                return Err(StateRejection::Invalid);
            }
            Err(e) => {
                debug!(error = %e, "state rejected");
                return Err(StateRejection::Invalid);
            }
        };

        let now = spotify_auth::now_millis() / 1000;
        let max_age = self.state_max_age.as_secs();
        let mut consumed = self.consumed.lock().await;
        // States past max age fail verification anyway
        consumed.retain(|_, issued_at| now.saturating_sub(*issued_at) <= max_age);
        if consumed.contains_key(value) {
            return Err(StateRejection::Replayed);
        }
        consumed.insert(value.to_owned(), issued.issued_at);
        Ok(())
    }

    async fn release(&self, value: &str) {
        self.consumed.lock().await.remove(value);
    }

    #[cfg(test)]
    async fn consumed_len(&self) -> usize {
        self.consumed.lock().await.len()
    }
}

fn reason_error(reason: AbortReason) -> AppError {
    match reason {
        AbortReason::StateMismatch => AppError::StateMismatch,
        AbortReason::StateExpired => AppError::StateExpired,
        AbortReason::StateReplayed => AppError::StateReplayed,
        AbortReason::ProviderDenied(error) => AppError::ProviderDenied(error),
        AbortReason::MissingCode => AppError::MissingCode,
        AbortReason::ExchangeFailed => {
            AppError::Exchange(spotify_auth::Error::TokenExchange("exchange failed".into()))
        }
        AbortReason::StoreFailed => AppError::Internal("token store failed".into()),
    }
}

fn outcome_label(reason: &AbortReason) -> &'static str {
    match reason {
        AbortReason::StateMismatch => "state_mismatch",
        AbortReason::StateExpired => "state_expired",
        AbortReason::StateReplayed => "replayed",
        AbortReason::ProviderDenied(_) => "denied",
        AbortReason::MissingCode => "missing_code",
        AbortReason::ExchangeFailed => "exchange_error",
        AbortReason::StoreFailed => "storage_error",
    }
}

fn state_cookie(value: String) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// GET /connect-spotify
pub async fn connect(
    State(state): State<AppState>,
    ctx: RequestContext,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    let (value, url) = state.oauth.initiate(&ctx.user)?;
    Ok((jar.add(state_cookie(value)), Redirect::temporary(&url)))
}

/// GET /callback
pub async fn callback(
    State(state): State<AppState>,
    ctx: RequestContext,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    let cookie_state = jar.get(STATE_COOKIE).map(|c| c.value().to_owned());
    state
        .oauth
        .complete(&ctx.user, cookie_state.as_deref(), params)
        .await?;

    let jar = jar.remove(Cookie::build(STATE_COOKIE).path("/"));
    Ok((jar, redirect_found(HOME_PATH)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Form;
    use axum::http::StatusCode;
    use axum::routing::post;
    use common::Secret;
    use credential_store::{FileCredentialStore, StoreFuture, UserId};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Mock token endpoint. Codes starting with `good` exchange once each;
    /// `no-refresh-code` answers without a refresh token.
    async fn start_token_server() -> (String, Arc<AtomicU32>, tokio::task::JoinHandle<()>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let used = Arc::new(std::sync::Mutex::new(HashSet::<String>::new()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/api/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let counter = counter.clone();
                let used = used.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let code = form.get("code").cloned().unwrap_or_default();
                    if code == "no-refresh-code" {
                        return (
                            StatusCode::OK,
                            r#"{"access_token":"at_1","expires_in":3600}"#.to_string(),
                        );
                    }
                    if code.starts_with("good") && used.lock().unwrap().insert(code) {
                        return (
                            StatusCode::OK,
                            r#"{"access_token":"at_1","refresh_token":"rt_1","expires_in":3600,"scope":"user-library-read"}"#
                                .to_string(),
                        );
                    }
                    (
                        StatusCode::BAD_REQUEST,
                        r#"{"error":"invalid_grant"}"#.to_string(),
                    )
                }
            }),
        );
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/api/token"), calls, handle)
    }

    /// Delegates to the file store; token writes fail while `fail_upserts` is set.
    struct FlakyStore {
        inner: Arc<FileCredentialStore>,
        fail_upserts: AtomicBool,
    }

    impl CredentialStore for FlakyStore {
        fn create_user<'a>(
            &'a self,
            username: &'a str,
            password_hash: String,
        ) -> StoreFuture<'a, User> {
            self.inner.create_user(username, password_hash)
        }

        fn find_user(&self, id: UserId) -> StoreFuture<'_, Option<User>> {
            self.inner.find_user(id)
        }

        fn find_user_by_username<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<User>> {
            self.inner.find_user_by_username(username)
        }

        fn upsert_token(&self, token: OAuthToken) -> StoreFuture<'_, ()> {
            if self.fail_upserts.load(Ordering::SeqCst) {
                return Box::pin(async {
                    Err(credential_store::Error::Io("disk full".into()))
                });
            }
            self.inner.upsert_token(token)
        }

        fn find_token(&self, user_id: UserId) -> StoreFuture<'_, Option<OAuthToken>> {
            self.inner.find_token(user_id)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<FileCredentialStore>,
        flaky: Arc<FlakyStore>,
        coordinator: OAuth2Coordinator,
        signer: StateSigner,
        user: User,
        calls: Arc<AtomicU32>,
        _server: tokio::task::JoinHandle<()>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (url, calls, server) = start_token_server().await;
        let store = Arc::new(
            FileCredentialStore::load(dir.path().join("credentials.json"))
                .await
                .unwrap(),
        );
        let user = store.create_user("alice", "h".into()).await.unwrap();
        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
            fail_upserts: AtomicBool::new(false),
        });
        let mut oauth = OAuthConfig::spotify(
            "client-abc".into(),
            Secret::new("secret-xyz".into()),
            "http://localhost:8080/callback".into(),
        );
        oauth.token_url = url;
        let signer = StateSigner::new(Secret::new(b"test-signing-key".to_vec()));
        let coordinator = OAuth2Coordinator::new(
            reqwest::Client::new(),
            Arc::new(oauth),
            flaky.clone(),
            signer.clone(),
            Duration::from_secs(600),
        );
        Fixture {
            _dir: dir,
            store,
            flaky,
            coordinator,
            signer,
            user,
            calls,
            _server: server,
        }
    }

    fn params(state: Option<&str>, code: Option<&str>) -> CallbackParams {
        CallbackParams {
            state: state.map(String::from),
            code: code.map(String::from),
            error: None,
        }
    }

    #[tokio::test]
    async fn initiate_builds_authorize_url_with_state() {
        let f = fixture().await;
        let (state, url) = f.coordinator.initiate(&f.user).unwrap();

        let parsed = reqwest::Url::parse(&url).unwrap();
        let query: HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(query["state"], state);
        assert_eq!(query["client_id"], "client-abc");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["redirect_uri"], "http://localhost:8080/callback");
        assert_eq!(query["scope"], "user-library-read");
        assert!(
            f.signer
                .verify(&state, f.user.id, Duration::from_secs(600))
                .is_ok()
        );
    }

    #[tokio::test]
    async fn initiate_issues_distinct_states() {
        let f = fixture().await;
        let (a, _) = f.coordinator.initiate(&f.user).unwrap();
        let (b, _) = f.coordinator.initiate(&f.user).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn valid_callback_stores_one_token() {
        let f = fixture().await;
        let (state, _) = f.coordinator.initiate(&f.user).unwrap();

        f.coordinator
            .complete(&f.user, Some(&state), params(Some(&state), Some("good-code")))
            .await
            .unwrap();

        let token = f.store.find_token(f.user.id).await.unwrap().unwrap();
        assert_eq!(token.access_token, "at_1");
        assert_eq!(token.refresh_token, "rt_1");
        assert!(token.expires_at > now_millis());
        assert_eq!(f.store.token_count().await, 1);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn replayed_callback_is_rejected_without_exchange() {
        let f = fixture().await;
        let (state, _) = f.coordinator.initiate(&f.user).unwrap();
        f.coordinator
            .complete(&f.user, Some(&state), params(Some(&state), Some("good-code")))
            .await
            .unwrap();

        let err = f
            .coordinator
            .complete(&f.user, Some(&state), params(Some(&state), Some("good-code")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateReplayed), "got {err:?}");
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.token_count().await, 1);
    }

    #[tokio::test]
    async fn mismatched_state_never_calls_provider() {
        let f = fixture().await;
        let (state, _) = f.coordinator.initiate(&f.user).unwrap();
        let (other, _) = f.coordinator.initiate(&f.user).unwrap();

        let cases = [
            (Some(state.as_str()), params(Some(&other), Some("good-code"))),
            (Some(state.as_str()), params(None, Some("good-code"))),
            (Some(state.as_str()), params(Some(""), Some("good-code"))),
            (None, params(Some(&state), Some("good-code"))),
            (Some(""), params(Some(""), Some("good-code"))),
        ];
        for (cookie, p) in cases {
            let err = f.coordinator.complete(&f.user, cookie, p).await.unwrap_err();
            assert!(matches!(err, AppError::StateMismatch), "got {err:?}");
        }
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.store.token_count().await, 0);
    }

    #[tokio::test]
    async fn forged_state_matching_cookie_is_rejected() {
        let f = fixture().await;
        let forged = StateSigner::random().issue(f.user.id).value;

        let err = f
            .coordinator
            .complete(&f.user, Some(&forged), params(Some(&forged), Some("good-code")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateMismatch), "got {err:?}");
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_state_is_rejected() {
        let f = fixture().await;
        let old = f.signer.issue_at(f.user.id, now_millis() / 1000 - 601).value;

        let err = f
            .coordinator
            .complete(&f.user, Some(&old), params(Some(&old), Some("good-code")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateExpired), "got {err:?}");
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_code_is_rejected() {
        let f = fixture().await;
        let (state, _) = f.coordinator.initiate(&f.user).unwrap();

        let err = f
            .coordinator
            .complete(&f.user, Some(&state), params(Some(&state), Some("")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingCode), "got {err:?}");
        assert_eq!(f.coordinator.consumed_len().await, 0, "claim released");
    }

    #[tokio::test]
    async fn provider_denial_is_rejected() {
        let f = fixture().await;
        let (state, _) = f.coordinator.initiate(&f.user).unwrap();

        let err = f
            .coordinator
            .complete(
                &f.user,
                Some(&state),
                CallbackParams {
                    state: Some(state.clone()),
                    code: None,
                    error: Some("access_denied".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, AppError::ProviderDenied(ref e) if e == "access_denied"),
            "got {err:?}"
        );
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_exchange_releases_state() {
        let f = fixture().await;
        let (state, _) = f.coordinator.initiate(&f.user).unwrap();

        let err = f
            .coordinator
            .complete(&f.user, Some(&state), params(Some(&state), Some("bad-code")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Exchange(_)), "got {err:?}");
        assert_eq!(f.store.token_count().await, 0);

        // Same state may be retried once the provider issues a usable code
        f.coordinator
            .complete(&f.user, Some(&state), params(Some(&state), Some("good-code")))
            .await
            .unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn state_issued_to_other_user_is_rejected() {
        let f = fixture().await;
        let mallory = f.store.create_user("mallory", "h".into()).await.unwrap();
        let (state, _) = f.coordinator.initiate(&f.user).unwrap();

        let err = f
            .coordinator
            .complete(&mallory, Some(&state), params(Some(&state), Some("good-code")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateMismatch), "got {err:?}");
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
        assert!(f.store.find_token(mallory.id).await.unwrap().is_none());
        assert_eq!(f.coordinator.consumed_len().await, 0);

        // The user who started the flow can still finish it
        f.coordinator
            .complete(&f.user, Some(&state), params(Some(&state), Some("good-code")))
            .await
            .unwrap();
        assert!(f.store.find_token(f.user.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn store_failure_releases_state() {
        let f = fixture().await;
        let (state, _) = f.coordinator.initiate(&f.user).unwrap();
        f.flaky.fail_upserts.store(true, Ordering::SeqCst);

        let err = f
            .coordinator
            .complete(&f.user, Some(&state), params(Some(&state), Some("good-code")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)), "got {err:?}");
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(f.store.token_count().await, 0);
        assert_eq!(f.coordinator.consumed_len().await, 0, "claim released");

        f.flaky.fail_upserts.store(false, Ordering::SeqCst);
        f.coordinator
            .complete(&f.user, Some(&state), params(Some(&state), Some("good-code-2")))
            .await
            .unwrap();
        assert_eq!(f.store.token_count().await, 1);
    }

    #[tokio::test]
    async fn exchange_without_refresh_token_is_rejected() {
        let f = fixture().await;
        let (state, _) = f.coordinator.initiate(&f.user).unwrap();

        let err = f
            .coordinator
            .complete(
                &f.user,
                Some(&state),
                params(Some(&state), Some("no-refresh-code")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Exchange(_)), "got {err:?}");
        assert_eq!(f.store.token_count().await, 0);
        assert_eq!(f.coordinator.consumed_len().await, 0, "claim released");
    }

    #[tokio::test]
    async fn second_connect_replaces_token() {
        let f = fixture().await;
        f.store
            .upsert_token(OAuthToken {
                user_id: f.user.id,
                access_token: "at_old".into(),
                refresh_token: "rt_old".into(),
                expires_at: 0,
                scope: None,
                updated_at: 0,
            })
            .await
            .unwrap();

        let (state, _) = f.coordinator.initiate(&f.user).unwrap();
        f.coordinator
            .complete(&f.user, Some(&state), params(Some(&state), Some("good-code")))
            .await
            .unwrap();

        assert_eq!(f.store.token_count().await, 1);
        let token = f.store.find_token(f.user.id).await.unwrap().unwrap();
        assert_eq!(token.access_token, "at_1");
    }

    #[tokio::test]
    async fn ledger_drops_entries_past_max_age() {
        let f = fixture().await;
        f.coordinator
            .consumed
            .lock()
            .await
            .insert("stale".into(), now_millis() / 1000 - 3600);

        let (state, _) = f.coordinator.initiate(&f.user).unwrap();
        f.coordinator
            .complete(&f.user, Some(&state), params(Some(&state), Some("good-code")))
            .await
            .unwrap();

        assert_eq!(f.coordinator.consumed_len().await, 1);
    }
}
