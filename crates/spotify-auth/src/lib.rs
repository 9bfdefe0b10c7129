//! Spotify OAuth client library
//!
//! Authorize URL construction, signed CSRF state, and token endpoint calls
//! for the Authorization-Code grant. No HTTP server concerns live here; the
//! gateway service wires these pieces into its routes.
//!
//! Flow:
//! 1. Gateway issues a state for the user via `StateSigner::issue()`
//! 2. Browser is sent to `OAuthConfig::authorization_url(state)`
//! 3. Callback state is checked against the signed-in user with `StateSigner::verify()`
//! 4. Code is exchanged via `token::exchange_code()`
//! 5. Expiring tokens are renewed via `token::refresh_token()`

pub mod config;
pub mod constants;
pub mod error;
pub mod state;
pub mod token;

pub use config::OAuthConfig;
pub use constants::*;
pub use error::{Error, Result};
pub use state::{IssuedState, StateError, StateSigner};
pub use token::{TokenResponse, exchange_code, now_millis, refresh_token};
