//! CSRF state for the Authorization-Code flow
//!
//! The state value round-trips through the provider's authorize redirect and
//! must come back unchanged on the callback. The gateway keeps no server-side
//! copy of outstanding states; instead each value carries the id of the user
//! who started the flow, its issuance time, and an HMAC-SHA256 tag over
//! `nonce.user_id.issued_at`. The callback checks authenticity, owner and age
//! from the cookie alone.
//!
//! Wire format: `BASE64URL(nonce).user_id.issued_at_secs.BASE64URL(tag)`

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use hmac::{Hmac, Mac};
use rand::RngExt;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Allowed clock skew for states stamped slightly in the future.
const MAX_FUTURE_SKEW_SECS: u64 = 60;

/// Why a presented state value was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("state value is malformed")]
    Malformed,

    #[error("state signature does not verify")]
    BadSignature,

    #[error("state was issued to another user")]
    WrongUser,

    #[error("state expired ({age_secs}s old)")]
    Expired { age_secs: u64 },

    #[error("state issued in the future")]
    IssuedInFuture,
}

/// A freshly issued or successfully verified state value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedState {
    pub value: String,
    pub user_id: u64,
    pub issued_at: u64,
}

/// Issues and verifies signed state values with a process-wide key.
#[derive(Clone)]
pub struct StateSigner {
    key: Secret<Vec<u8>>,
}

impl StateSigner {
    pub fn new(key: Secret<Vec<u8>>) -> Self {
        Self { key }
    }

    /// Signer with a random 256-bit key. States issued by a previous process
    /// will no longer verify, which is fine for a 10-minute window.
    pub fn random() -> Self {
        let mut key = vec![0u8; 32];
        rand::rng().fill(key.as_mut_slice());
        Self::new(Secret::new(key))
    }

    /// Issue a new state for `user_id` stamped with the current time.
    pub fn issue(&self, user_id: u64) -> IssuedState {
        self.issue_at(user_id, now_secs())
    }

    /// Issue a new state with an explicit issuance time.
    pub fn issue_at(&self, user_id: u64, issued_at: u64) -> IssuedState {
        let mut nonce = [0u8; 16];
        rand::rng().fill(&mut nonce);
        let payload = format!("{}.{user_id}.{issued_at}", URL_SAFE_NO_PAD.encode(nonce));
        let tag = URL_SAFE_NO_PAD.encode(self.mac(&payload).finalize().into_bytes());
        IssuedState {
            value: format!("{payload}.{tag}"),
            user_id,
            issued_at,
        }
    }

    /// Verify authenticity, owner and age against the current time.
    pub fn verify(
        &self,
        value: &str,
        user_id: u64,
        max_age: Duration,
    ) -> Result<IssuedState, StateError> {
        self.verify_at(value, user_id, now_secs(), max_age)
    }

    pub fn verify_at(
        &self,
        value: &str,
        user_id: u64,
        now: u64,
        max_age: Duration,
    ) -> Result<IssuedState, StateError> {
        let mut parts = value.split('.');
        let (Some(nonce), Some(owner), Some(issued_at), Some(tag), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(StateError::Malformed);
        };
        if nonce.is_empty() {
            return Err(StateError::Malformed);
        }
        let owner: u64 = owner.parse().map_err(|_| StateError::Malformed)?;
        let issued_at: u64 = issued_at.parse().map_err(|_| StateError::Malformed)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| StateError::Malformed)?;

        let payload = format!("{nonce}.{owner}.{issued_at}");
        self.mac(&payload)
            .verify_slice(&tag)
            .map_err(|_| StateError::BadSignature)?;

        if owner != user_id {
            return Err(StateError::WrongUser);
        }

        if issued_at > now + MAX_FUTURE_SKEW_SECS {
            return Err(StateError::IssuedInFuture);
        }
        let age_secs = now.saturating_sub(issued_at);
        if age_secs > max_age.as_secs() {
            return Err(StateError::Expired { age_secs });
        }

        Ok(IssuedState {
            value: value.to_string(),
            user_id: owner,
            issued_at,
        })
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.key.expose())
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        mac
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
