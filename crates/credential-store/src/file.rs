//! JSON file credential store
//!
//! Keeps users and tokens in one JSON document. All writes use atomic
//! temp-file + rename to prevent corruption on crash, and a tokio Mutex
//! serializes concurrent writers (registration, callback completion, refresh).
//! Reads take the lock briefly and clone the row they need.
//!
//! Tokens are keyed by user id, so a second connect for the same user
//! replaces the earlier token instead of accumulating rows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{OAuthToken, User, UserId};
use crate::{CredentialStore, StoreFuture};

/// On-disk document layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    next_user_id: UserId,
    #[serde(default)]
    users: HashMap<UserId, User>,
    #[serde(default)]
    tokens: HashMap<UserId, OAuthToken>,
}

/// File-backed `CredentialStore`.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<Document>,
}

impl FileCredentialStore {
    /// Load the store from the given file path.
    ///
    /// If the file doesn't exist, creates it empty (cold start with zero users).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let doc: Document = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing credential file: {e}")))?;
            info!(
                path = %path.display(),
                users = doc.users.len(),
                tokens = doc.tokens.len(),
                "loaded credential store"
            );
            doc
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let doc = Document {
                next_user_id: 1,
                ..Default::default()
            };
            write_atomic(&path, &doc).await?;
            doc
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Number of stored users.
    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }

    /// Number of stored tokens.
    pub async fn token_count(&self) -> usize {
        self.state.lock().await.tokens.len()
    }

    async fn create_user_inner(&self, username: &str, password_hash: String) -> Result<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.username == username) {
            return Err(Error::Conflict(username.to_string()));
        }

        let id = state.next_user_id.max(1);
        let user = User {
            id,
            username: username.to_string(),
            password_hash,
            created_at: now_millis(),
        };
        state.next_user_id = id + 1;
        state.users.insert(id, user.clone());

        if let Err(e) = write_atomic(&self.path, &state).await {
            // Keep memory consistent with disk
            state.users.remove(&id);
            state.next_user_id = id;
            return Err(e);
        }
        debug!(user_id = id, "created user");
        Ok(user)
    }

    async fn upsert_token_inner(&self, token: OAuthToken) -> Result<()> {
        let mut state = self.state.lock().await;
        let user_id = token.user_id;
        if !state.users.contains_key(&user_id) {
            return Err(Error::NotFound(format!("user {user_id}")));
        }

        let previous = state.tokens.insert(user_id, token);
        if let Err(e) = write_atomic(&self.path, &state).await {
            match previous {
                Some(prev) => state.tokens.insert(user_id, prev),
                None => state.tokens.remove(&user_id),
            };
            return Err(e);
        }
        debug!(user_id, "stored token");
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn create_user<'a>(&'a self, username: &'a str, password_hash: String) -> StoreFuture<'a, User> {
        Box::pin(self.create_user_inner(username, password_hash))
    }

    fn find_user(&self, id: UserId) -> StoreFuture<'_, Option<User>> {
        Box::pin(async move { Ok(self.state.lock().await.users.get(&id).cloned()) })
    }

    fn find_user_by_username<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<User>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .users
                .values()
                .find(|u| u.username == username)
                .cloned())
        })
    }

    fn upsert_token(&self, token: OAuthToken) -> StoreFuture<'_, ()> {
        Box::pin(self.upsert_token_inner(token))
    }

    fn find_token(&self, user_id: UserId) -> StoreFuture<'_, Option<OAuthToken>> {
        Box::pin(async move { Ok(self.state.lock().await.tokens.get(&user_id).cloned()) })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Write the document to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains password hashes and OAuth tokens.
async fn write_atomic(path: &Path, doc: &Document) -> Result<()> {
    let json = serde_json::to_string_pretty(doc)
        .map_err(|e| Error::Parse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
