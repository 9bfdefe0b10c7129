//! Durable records for gateway users and their provider tokens
//!
//! The `CredentialStore` trait is the repository seam the gateway depends on.
//! `FileCredentialStore` is the shipped implementation: a single JSON file
//! written atomically, with one token row per user.

pub mod error;
pub mod file;
pub mod model;

use std::future::Future;
use std::pin::Pin;

pub use error::{Error, Result};
pub use file::FileCredentialStore;
pub use model::{OAuthToken, User, UserId};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Repository for users and OAuth tokens.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CredentialStore>`).
pub trait CredentialStore: Send + Sync {
    /// Create a user. Fails with `Conflict` if the username is taken.
    fn create_user<'a>(&'a self, username: &'a str, password_hash: String) -> StoreFuture<'a, User>;

    fn find_user(&self, id: UserId) -> StoreFuture<'_, Option<User>>;

    fn find_user_by_username<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<User>>;

    /// Insert or replace the token for `token.user_id`. The user must exist.
    fn upsert_token(&self, token: OAuthToken) -> StoreFuture<'_, ()>;

    fn find_token(&self, user_id: UserId) -> StoreFuture<'_, Option<OAuthToken>>;
}
