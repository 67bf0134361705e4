//! Login, validation, refresh and logout.
//!
//! Flow Overview:
//! 1) `authenticate` checks the lock, looks the account up in the database,
//!    verifies the password and issues a token. Failures feed the lockout counter.
//! 2) `validate` verifies the token, rejects revoked ids and resolves the
//!    identity through the cache; the result is a [`Session`].
//! 3) `refresh` issues a replacement and revokes the old id; `revoke` only revokes.
//!
//! All state lives in the shared store, so any instance can continue a session
//! started on another.

use regex::Regex;
use std::{sync::Arc, time::Duration};
use tracing::{error, info, instrument, warn};

use super::{
    cache::IdentityCache,
    claims::{Clock, IssuedToken, TokenClaims, TokenSigner},
    error::AuthError,
    identity::{Identity, IdentityLookup},
    lockout::{FailureOutcome, LockoutTracker},
    password::PasswordChecker,
    revocation::RevocationList,
    state::AuthConfig,
};
use crate::store::KeyedStore;

const USERNAME_MAX_LEN: usize = 255;
const PASSWORD_MAX_LEN: usize = 1024;

/// A validated token and the identity it belongs to.
#[derive(Clone, Debug)]
pub struct Session {
    pub claims: TokenClaims,
    pub identity: Identity,
}

pub struct TokenLifecycle {
    signer: TokenSigner,
    revocations: RevocationList,
    lockout: LockoutTracker,
    cache: IdentityCache,
    lookup: Arc<dyn IdentityLookup>,
    passwords: PasswordChecker,
    clock: Clock,
    max_refresh: Duration,
}

impl TokenLifecycle {
    pub fn new(
        config: &AuthConfig,
        store: Arc<dyn KeyedStore>,
        lookup: Arc<dyn IdentityLookup>,
        passwords: PasswordChecker,
        clock: Clock,
    ) -> Self {
        let prefix = config.key_prefix();
        Self {
            signer: TokenSigner::new(
                config.signing_key(),
                config.app_name(),
                config.token_timeout(),
            ),
            revocations: RevocationList::new(store.clone(), &prefix),
            lockout: LockoutTracker::new(
                store.clone(),
                &prefix,
                config.max_login_attempts(),
                config.lock_duration(),
            ),
            cache: IdentityCache::new(store, lookup.clone(), &prefix, config.cache_ttl()),
            lookup,
            passwords,
            clock,
            max_refresh: config.max_refresh(),
        }
    }

    #[must_use]
    pub fn lockout(&self) -> &LockoutTracker {
        &self.lockout
    }

    /// Check credentials and issue a token.
    ///
    /// # Errors
    /// Returns the [`AuthError`] describing why the login was refused.
    #[instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<IssuedToken, AuthError> {
        let username = username.trim();
        validate_credentials(username, password)?;
        info!("Login attempt: {username}");

        match self.lockout.is_locked(username).await {
            Ok(false) => {}
            Ok(true) => {
                warn!("Login refused, account locked: {username}");
                return Err(AuthError::AccountLocked);
            }
            Err(err) => {
                error!("Failed to check account lock for {username}: {err}");
                return Err(AuthError::Unavailable);
            }
        }

        let identity = match self.lookup.find_by_username(username).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                if let Err(err) = self.passwords.verify_dummy(password).await {
                    error!("{err:#}");
                }
                warn!("Login for unknown user: {username}");
                return Err(AuthError::BadCredentials);
            }
            Err(err) => {
                error!("Identity lookup failed for {username}: {err:#}");
                return Err(AuthError::Unavailable);
            }
        };

        if !identity.is_active() {
            warn!("Login for disabled account: {username}");
            return Err(AuthError::AccountDisabled);
        }

        let matches = self
            .passwords
            .verify(password, &identity.password_hash)
            .await
            .map_err(|err| {
                error!("{err:#}");
                AuthError::Unavailable
            })?;

        if !matches {
            warn!("Invalid password for user: {username}");
            match self.lockout.record_failure(username).await {
                Ok(FailureOutcome::Counted(count)) => {
                    info!("Failed login {count} for {username}");
                }
                Ok(FailureOutcome::Locked | FailureOutcome::AlreadyLocked) => {}
                Err(err) => error!("Failed to record login failure for {username}: {err}"),
            }
            return Err(AuthError::BadCredentials);
        }

        if let Err(err) = self.lockout.clear_failures(username).await {
            error!("Failed to clear login failures for {username}: {err}");
        }
        self.cache.invalidate(identity.id).await;

        let issued = self.signer.issue(identity.id, None, self.clock.now())?;
        info!("Login successful: {username}");
        Ok(issued)
    }

    /// Verify a presented token and resolve its identity.
    ///
    /// # Errors
    /// Returns the [`AuthError`] describing why the token is not acceptable.
    pub async fn validate(&self, token: &str) -> Result<Session, AuthError> {
        let claims = self.signer.verify(token, self.clock.now())?;

        match self.revocations.contains(&claims.jti).await {
            Ok(false) => {}
            Ok(true) => {
                warn!("Token revoked: {}", claims.jti);
                return Err(AuthError::Revoked);
            }
            Err(err) => {
                error!("Failed to check revocation of {}: {err}", claims.jti);
                return Err(AuthError::Unverifiable);
            }
        }

        let identity_id = claims.identity_id()?;
        let resolved = self.cache.resolve(identity_id).await.map_err(|err| {
            error!("User lookup error for {identity_id}: {err:#}");
            AuthError::IdentityUnavailable
        })?;

        let Some(identity) = resolved.identity else {
            return Err(AuthError::InvalidToken);
        };

        if !identity.is_active() {
            if resolved.from_cache {
                self.cache.invalidate(identity_id).await;
            }
            info!("Inactive user access: {identity_id}");
            return Err(AuthError::AccountDisabled);
        }

        Ok(Session { claims, identity })
    }

    /// # Errors
    /// Returns the [`AuthError`] describing why the token cannot be refreshed.
    pub async fn refresh(&self, token: &str) -> Result<IssuedToken, AuthError> {
        let session = self.validate(token).await?;
        self.rotate(&session).await
    }

    /// Replace an already validated session's token.
    ///
    /// The old id is revoked before the new token is handed out; if that write
    /// fails, the new token is dropped.
    ///
    /// # Errors
    /// Returns [`AuthError::RefreshExpired`] past the max-refresh window and
    /// [`AuthError::Unavailable`] when the old token cannot be revoked.
    pub async fn rotate(&self, session: &Session) -> Result<IssuedToken, AuthError> {
        let now = self.clock.now();
        let max_refresh = i64::try_from(self.max_refresh.as_secs()).unwrap_or(i64::MAX);
        if now > session.claims.orig_iat.saturating_add(max_refresh) {
            return Err(AuthError::RefreshExpired);
        }

        let issued = self
            .signer
            .issue(session.identity.id, Some(session.claims.orig_iat), now)?;

        self.revocations
            .add(&session.claims.jti, session.claims.remaining(now))
            .await
            .map_err(|err| {
                error!("Failed to revoke refreshed token {}: {err}", session.claims.jti);
                AuthError::Unavailable
            })?;

        info!(
            "Token refreshed for {}: {} -> {}",
            session.identity.id, session.claims.jti, issued.claims.jti
        );
        Ok(issued)
    }

    /// # Errors
    /// Returns the [`AuthError`] describing why the token cannot be revoked.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let session = self.validate(token).await?;
        self.revoke_session(&session).await
    }

    /// # Errors
    /// Returns [`AuthError::Unavailable`] when the revocation cannot be written.
    pub async fn revoke_session(&self, session: &Session) -> Result<(), AuthError> {
        let remaining = session.claims.remaining(self.clock.now());
        self.revocations
            .add(&session.claims.jti, remaining)
            .await
            .map_err(|err| {
                error!("Failed to revoke token {}: {err}", session.claims.jti);
                AuthError::Unavailable
            })?;
        info!("Token revoked for {}: {}", session.identity.id, session.claims.jti);
        Ok(())
    }
}

fn validate_credentials(username: &str, password: &str) -> Result<(), AuthError> {
    if username.is_empty() {
        return Err(AuthError::Validation("username is required".to_string()));
    }
    if password.is_empty() {
        return Err(AuthError::Validation("password is required".to_string()));
    }
    if username.len() > USERNAME_MAX_LEN || !valid_username(username) {
        return Err(AuthError::Validation("invalid username".to_string()));
    }
    if password.len() > PASSWORD_MAX_LEN {
        return Err(AuthError::Validation("password is too long".to_string()));
    }
    Ok(())
}

fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9._@+-]+$").is_ok_and(|regex| regex.is_match(username))
}
