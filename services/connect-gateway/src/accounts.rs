//! Registration, login and logout

use axum::Form;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::error::{AppError, LOGIN_PATH};
use crate::gate::{SESSION_COOKIE, expired_session_cookie, session_cookie};
use crate::metrics;
use crate::pages::{HOME_PATH, redirect_found};
use crate::password;

/// Form body for both register and login. Missing fields deserialize as empty
/// so they surface as a validation error rather than a rejection.
#[derive(Deserialize)]
pub struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl Credentials {
    fn validate(self) -> Result<(String, String), AppError> {
        let username = self.username.trim().to_string();
        if username.is_empty() || self.password.is_empty() {
            return Err(AppError::Validation(
                "Username and password are required".into(),
            ));
        }
        Ok((username, self.password))
    }
}

/// POST /register
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<Credentials>,
) -> Result<Response, AppError> {
    let (username, password) = form.validate()?;
    let password_hash = password::hash(password).await?;
    let user = state.store.create_user(&username, password_hash).await?;

    let session_id = state.sessions.create(user.id).await;
    info!(user_id = user.id, "user registered");
    Ok((
        jar.add(session_cookie(session_id.as_str())),
        redirect_found(HOME_PATH),
    )
        .into_response())
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<Credentials>,
) -> Result<Response, AppError> {
    let (username, password) = form.validate().inspect_err(|_| {
        metrics::record_login("validation");
    })?;

    let Some(user) = state.store.find_user_by_username(&username).await? else {
        password::burn(password).await;
        metrics::record_login("invalid_credentials");
        return Err(AppError::InvalidCredentials);
    };
    if !password::verify(password, user.password_hash.clone()).await? {
        metrics::record_login("invalid_credentials");
        return Err(AppError::InvalidCredentials);
    }

    let session_id = state.sessions.create(user.id).await;
    metrics::record_login("success");
    info!(user_id = user.id, "user logged in");
    Ok((
        jar.add(session_cookie(session_id.as_str())),
        redirect_found(HOME_PATH),
    )
        .into_response())
}

/// POST /logout
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE)
        && state.sessions.invalidate(cookie.value()).await
    {
        info!("session logged out");
    }
    (jar.remove(expired_session_cookie()), redirect_found(LOGIN_PATH)).into_response()
}
