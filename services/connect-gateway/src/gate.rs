//! Authentication gate for protected routes
//!
//! `require_session` runs as route middleware: cookie → session → user →
//! fresh token. On success the resolved `RequestContext` is inserted into the
//! request extensions and handlers pull it out with the extractor below.
//! Every failure to resolve a user sends the browser back to `/login`.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use credential_store::{OAuthToken, User};
use tracing::{debug, warn};

use crate::AppState;
use crate::error::AppError;

pub const SESSION_COOKIE: &str = "session_id";

/// Identity and token for the current request.
///
/// `token` is `None` both when the user has not connected an account yet and
/// when a refresh just failed.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user: User,
    pub token: Option<OAuthToken>,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or(AppError::Unauthenticated)
    }
}

/// Session cookie: whole site, not readable from scripts, no expiry.
pub fn session_cookie(session_id: &str) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id.to_owned()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Removal cookie matching `session_cookie`'s path.
pub fn expired_session_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session_id = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or(AppError::Unauthenticated)?;

    let Some(session) = state.sessions.lookup(&session_id).await else {
        debug!("unknown or expired session");
        return Err(AppError::Unauthenticated);
    };

    let Some(user) = state.store.find_user(session.user_id).await? else {
        warn!(user_id = session.user_id, "session refers to missing user, invalidating");
        state.sessions.invalidate(&session_id).await;
        return Err(AppError::Unauthenticated);
    };

    let token = state.tokens.ensure_fresh(&user).await;
    request
        .extensions_mut()
        .insert(RequestContext { user, token });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn extractor_without_context_is_unauthenticated() {
        let (mut parts, _) = HttpRequest::builder()
            .uri("/hello")
            .body(())
            .unwrap()
            .into_parts();
        let err = RequestContext::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()["location"], "/login");
    }

    #[tokio::test]
    async fn extractor_returns_inserted_context() {
        let (mut parts, _) = HttpRequest::builder()
            .uri("/hello")
            .body(())
            .unwrap()
            .into_parts();
        parts.extensions.insert(RequestContext {
            user: User {
                id: 3,
                username: "alice".into(),
                password_hash: "h".into(),
                created_at: 0,
            },
            token: None,
        });
        let ctx = RequestContext::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(ctx.user.username, "alice");
        assert!(ctx.token.is_none());
    }

    #[test]
    fn session_cookie_attributes() {
        let rendered = session_cookie("abc").to_string();
        assert!(rendered.starts_with("session_id=abc"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("Path=/"));
        assert!(rendered.contains("SameSite=Lax"));
        assert!(!rendered.contains("Expires"), "session cookie has no expiry");
    }
}
