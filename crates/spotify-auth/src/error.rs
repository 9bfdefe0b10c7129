//! Error types for OAuth client operations

/// Errors from the token endpoint and authorize URL construction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token endpoint timed out: {0}")]
    Timeout(String),

    /// The provider answered with 400/401/403: bad code, revoked refresh
    /// token, or bad client credentials. Retrying will not help.
    #[error("token endpoint rejected the grant ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl Error {
    /// Whether the failure is a transport hiccup worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_))
    }

    pub(crate) fn from_transport(context: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(format!("{context}: {e}"))
        } else {
            Error::Http(format!("{context}: {e}"))
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
