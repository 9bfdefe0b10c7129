//! Password hashing
//!
//! Argon2id with the crate's default parameters, PHC string format. Hashing
//! is CPU-bound, so both operations run on the blocking pool.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngExt;

use crate::error::AppError;

fn hash_blocking(password: &[u8]) -> Result<String, AppError> {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(format!("encoding salt: {e}")))?;
    Argon2::default()
        .hash_password(password, &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("hashing password: {e}")))
}

/// Hash `password` into a PHC string suitable for storage.
pub async fn hash(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash_blocking(password.as_bytes()))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))?
}

/// Check `password` against a stored hash. A malformed hash never verifies.
pub async fn verify(password: String, stored: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || {
        let Ok(parsed) = PasswordHash::new(&stored) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .map_err(|e| AppError::Internal(format!("verify task failed: {e}")))
}

/// Spend the same work as a real check when the username is unknown, so
/// response timing does not reveal which usernames exist.
pub async fn burn(password: String) {
    let _ = hash(password).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_then_verify() {
        let stored = hash("secret123".into()).await.unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify("secret123".into(), stored.clone()).await.unwrap());
        assert!(!verify("secret124".into(), stored).await.unwrap());
    }

    #[tokio::test]
    async fn same_password_gets_distinct_salts() {
        let a = hash("secret123".into()).await.unwrap();
        let b = hash("secret123".into()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn malformed_hash_never_verifies() {
        assert!(!verify("x".into(), "not-a-phc-string".into()).await.unwrap());
    }
}
