//! Session table and its operations
//!
//! One `tokio::sync::Mutex` guards the whole map. Every operation holds it only
//! for the map access itself; nothing awaits I/O while the lock is held.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use credential_store::UserId;
use rand::RngExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Opaque session identifier: 128 random bits, URL-safe base64.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Session ids are bearer credentials; keep them out of debug logs.
impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}…)", &self.0[..self.0.len().min(4)])
    }
}

/// A live session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub created_at: Instant,
    pub last_seen: Instant,
}

impl Session {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > ttl
    }
}

/// Concurrency-safe map from session id to user.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionRegistry {
    /// Create an empty registry whose sessions expire after `ttl` of inactivity.
    pub fn new(ttl: Duration) -> Self {
        info!(ttl_secs = ttl.as_secs(), "session registry initialized");
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Register a new session for `user_id` and return its identifier.
    pub async fn create(&self, user_id: UserId) -> SessionId {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let id = loop {
            let candidate = SessionId::generate();
            if !sessions.contains_key(candidate.as_str()) {
                break candidate;
            }
        };
        sessions.insert(
            id.as_str().to_owned(),
            Session {
                id: id.clone(),
                user_id,
                created_at: now,
                last_seen: now,
            },
        );
        metrics::gauge!("gateway_active_sessions").set(sessions.len() as f64);
        debug!(user_id, "session created");
        id
    }

    /// Resolve a session id. Expired sessions are removed and reported as absent;
    /// live ones have `last_seen` bumped.
    pub async fn lookup(&self, id: &str) -> Option<Session> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(id)?;

        if session.is_expired(now, self.ttl) {
            let user_id = session.user_id;
            sessions.remove(id);
            metrics::gauge!("gateway_active_sessions").set(sessions.len() as f64);
            debug!(user_id, "session expired on lookup");
            return None;
        }

        session.last_seen = now;
        Some(session.clone())
    }

    /// Remove a session. Returns whether it existed.
    pub async fn invalidate(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let removed = sessions.remove(id);
        metrics::gauge!("gateway_active_sessions").set(sessions.len() as f64);
        if let Some(session) = &removed {
            debug!(user_id = session.user_id, "session invalidated");
        }
        removed.is_some()
    }

    /// Drop every expired session. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now, self.ttl));
        let removed = before - sessions.len();
        metrics::gauge!("gateway_active_sessions").set(sessions.len() as f64);
        removed
    }

    /// Number of sessions currently held (including not-yet-swept expired ones).
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
