//! Request-boundary errors
//!
//! Every handler returns `Result<_, AppError>`. The mapping to HTTP is in one
//! place so status codes stay consistent across routes. Token refresh failures
//! never reach this type; the lifecycle manager degrades them to "no token".

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Login entry point that unauthenticated requests are steered to.
pub const LOGIN_PATH: &str = "/login";

#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or empty form fields
    #[error("{0}")]
    Validation(String),

    /// Unknown username or wrong password; both render identically
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("username already taken")]
    UsernameTaken,

    /// No session, or the session no longer resolves to a user
    #[error("not authenticated")]
    Unauthenticated,

    #[error("state mismatch")]
    StateMismatch,

    #[error("state expired")]
    StateExpired,

    #[error("state already used")]
    StateReplayed,

    #[error("missing authorization code")]
    MissingCode,

    #[error("authorization denied by provider: {0}")]
    ProviderDenied(String),

    #[error("token exchange failed: {0}")]
    Exchange(#[from] spotify_auth::Error),

    #[error("storage error: {0}")]
    Storage(credential_store::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<credential_store::Error> for AppError {
    fn from(e: credential_store::Error) -> Self {
        match e {
            credential_store::Error::Conflict(_) => AppError::UsernameTaken,
            other => AppError::Storage(other),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::StateMismatch
            | AppError::StateExpired
            | AppError::StateReplayed
            | AppError::MissingCode
            | AppError::ProviderDenied(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::UsernameTaken => StatusCode::CONFLICT,
            AppError::Unauthenticated => StatusCode::FOUND,
            AppError::Exchange(_) | AppError::Storage(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::Unauthenticated => {
                (status, [(header::LOCATION, LOGIN_PATH)]).into_response()
            }
            // Provider and storage details go to the log, not the browser
            AppError::Exchange(ref e) => {
                error!(error = %e, "authorization code exchange failed");
                (status, "failed to connect account").into_response()
            }
            AppError::Storage(ref e) => {
                error!(error = %e, "credential store failure");
                (status, "internal server error").into_response()
            }
            AppError::Internal(ref msg) => {
                error!(error = %msg, "internal error");
                (status, "internal server error").into_response()
            }
            other => (status, other.to_string()).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            AppError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::UsernameTaken.status(), StatusCode::CONFLICT);
        assert_eq!(AppError::StateMismatch.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::StateExpired.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::StateReplayed.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::MissingCode.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::ProviderDenied("access_denied".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Exchange(spotify_auth::Error::Http("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Storage(credential_store::Error::Io("disk".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn unauthenticated_redirects_to_login() {
        let response = AppError::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn storage_error_body_is_generic() {
        let response =
            AppError::Storage(credential_store::Error::Io("/var/secret/path".into()))
                .into_response();
        let body = body_text(response).await;
        assert_eq!(body, "internal server error");
    }

    #[tokio::test]
    async fn exchange_error_hides_provider_body() {
        let response = AppError::Exchange(spotify_auth::Error::Rejected {
            status: 400,
            body: r#"{"error":"invalid_grant"}"#.into(),
        })
        .into_response();
        let body = body_text(response).await;
        assert!(!body.contains("invalid_grant"), "got: {body}");
    }

    #[tokio::test]
    async fn credential_error_message() {
        let body = body_text(AppError::InvalidCredentials.into_response()).await;
        assert_eq!(body, "invalid credentials");
    }

    #[test]
    fn conflict_converts_to_username_taken() {
        let err: AppError = credential_store::Error::Conflict("alice".into()).into();
        assert!(matches!(err, AppError::UsernameTaken));
        let err: AppError = credential_store::Error::Io("x".into()).into();
        assert!(matches!(err, AppError::Storage(_)));
    }
}
