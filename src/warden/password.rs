//! Argon2 PHC password hashing and verification.
//!
//! Verification is CPU bound and runs on the blocking pool. Logins for unknown
//! accounts verify against a dummy hash built with the same parameters, so
//! they cost as much as a real mismatch.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash, PasswordHasher,
    PasswordVerifier, Version,
};
use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::warn;

/// Hash `password` into a PHC string using Argon2id with `params`.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str, params: Params) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash password"))?
        .to_string();
    Ok(hash)
}

/// Check `password` against a stored PHC string. Unparseable hashes never match.
fn verify_phc(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        warn!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[derive(Clone, Debug)]
pub struct PasswordChecker {
    dummy_hash: Arc<str>,
}

impl PasswordChecker {
    /// # Errors
    /// Returns an error if the dummy hash cannot be computed.
    pub fn new(params: Params) -> Result<Self> {
        let dummy_hash = hash_password("warden-dummy-password", params)
            .context("failed to prepare dummy password hash")?;
        Ok(Self {
            dummy_hash: Arc::from(dummy_hash),
        })
    }

    /// # Errors
    /// Returns an error if the blocking task panics or is cancelled.
    pub async fn verify(&self, password: &str, stored_hash: &str) -> Result<bool> {
        let password = password.to_string();
        let stored_hash = stored_hash.to_string();
        tokio::task::spawn_blocking(move || verify_phc(&password, &stored_hash))
            .await
            .context("password verification task failed")
    }

    /// Burn the same work as a real verification; the result is discarded.
    ///
    /// # Errors
    /// Returns an error if the blocking task panics or is cancelled.
    pub async fn verify_dummy(&self, password: &str) -> Result<()> {
        let password = password.to_string();
        let dummy_hash = Arc::clone(&self.dummy_hash);
        tokio::task::spawn_blocking(move || {
            let _ = verify_phc(&password, &dummy_hash);
        })
        .await
        .context("password verification task failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warden::testutil::cheap_params;

    #[tokio::test]
    async fn verifies_matching_password() -> Result<()> {
        let checker = PasswordChecker::new(cheap_params())?;
        let hash = hash_password("correct horse", cheap_params())?;

        assert!(hash.starts_with("$argon2id$"));
        assert!(checker.verify("correct horse", &hash).await?);
        assert!(!checker.verify("battery staple", &hash).await?);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_hash_never_matches() -> Result<()> {
        let checker = PasswordChecker::new(cheap_params())?;
        assert!(!checker.verify("anything", "plaintext").await?);
        assert!(!checker.verify("anything", "").await?);
        checker.verify_dummy("anything").await?;
        Ok(())
    }
}
