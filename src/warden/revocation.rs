//! Revoked token ids (`<prefix>:jwt:bl:<jti>`).
//!
//! Each entry lives exactly as long as the token it revokes would have, so the
//! list never grows past the set of still-valid tokens.

use std::{sync::Arc, time::Duration};
use tracing::debug;

use crate::store::{KeyedStore, StoreError};

#[derive(Clone)]
pub struct RevocationList {
    store: Arc<dyn KeyedStore>,
    prefix: String,
}

impl RevocationList {
    pub fn new(store: Arc<dyn KeyedStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: format!("{prefix}:jwt:bl"),
        }
    }

    fn key(&self, jti: &str) -> String {
        format!("{}:{jti}", self.prefix)
    }

    /// Revoke `jti` for the `remaining` lifetime of its token.
    ///
    /// A zero `remaining` means the token has already expired and nothing is written.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if the entry could not be written.
    pub async fn add(&self, jti: &str, remaining: Duration) -> Result<(), StoreError> {
        if remaining.is_zero() {
            debug!("Token {jti} already expired, not revoking");
            return Ok(());
        }
        self.store.set_ex(&self.key(jti), "1", remaining).await
    }

    /// # Errors
    /// Returns a [`StoreError`] if the store cannot answer; callers must treat
    /// the token as unverifiable.
    pub async fn contains(&self, jti: &str) -> Result<bool, StoreError> {
        self.store.exists(&self.key(jti)).await
    }
}
