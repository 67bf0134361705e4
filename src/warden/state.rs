//! Session-control configuration and the shared request state.

use anyhow::{bail, Result};
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};

use super::{
    claims::Clock,
    identity::IdentityLookup,
    lifecycle::TokenLifecycle,
    password::PasswordChecker,
    rate_limit::{NoopRateLimiter, RateLimiter, StoreRateLimiter},
};
use crate::store::KeyedStore;

pub const MIN_SIGNING_KEY_LEN: usize = 32;

const DEFAULT_APP_NAME: &str = "warden";
const DEFAULT_TOKEN_TIMEOUT_SECONDS: u64 = 8 * 60 * 60;
const DEFAULT_MAX_REFRESH_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_CACHE_TTL_SECONDS: u64 = 60;
const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 3;
const DEFAULT_LOCK_DURATION_SECONDS: u64 = 5 * 60;
const DEFAULT_RATE_LIMIT: u64 = 2;
const DEFAULT_RATE_WINDOW_SECONDS: u64 = 5;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    app_name: String,
    signing_key: SecretString,
    token_timeout: Duration,
    max_refresh: Duration,
    cache_ttl: Duration,
    max_login_attempts: u32,
    lock_duration: Duration,
    rate_limit: u64,
    rate_window: Duration,
    trust_forwarded_for: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(signing_key: SecretString) -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            signing_key,
            token_timeout: Duration::from_secs(DEFAULT_TOKEN_TIMEOUT_SECONDS),
            max_refresh: Duration::from_secs(DEFAULT_MAX_REFRESH_SECONDS),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            lock_duration: Duration::from_secs(DEFAULT_LOCK_DURATION_SECONDS),
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECONDS),
            trust_forwarded_for: false,
        }
    }

    #[must_use]
    pub fn with_app_name(mut self, app_name: String) -> Self {
        self.app_name = app_name;
        self
    }

    #[must_use]
    pub fn with_token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_refresh(mut self, max_refresh: Duration) -> Self {
        self.max_refresh = max_refresh;
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_login_attempts(mut self, attempts: u32) -> Self {
        self.max_login_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, limit: u64, window: Duration) -> Self {
        self.rate_limit = limit;
        self.rate_window = window;
        self
    }

    #[must_use]
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Namespace shared by every key this service writes.
    #[must_use]
    pub fn key_prefix(&self) -> String {
        format!("cache:{}", self.app_name)
    }

    #[must_use]
    pub fn signing_key(&self) -> &SecretString {
        &self.signing_key
    }

    #[must_use]
    pub fn token_timeout(&self) -> Duration {
        self.token_timeout
    }

    #[must_use]
    pub fn max_refresh(&self) -> Duration {
        self.max_refresh
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    #[must_use]
    pub fn max_login_attempts(&self) -> u32 {
        self.max_login_attempts
    }

    #[must_use]
    pub fn lock_duration(&self) -> Duration {
        self.lock_duration
    }

    #[must_use]
    pub fn rate_limit(&self) -> u64 {
        self.rate_limit
    }

    #[must_use]
    pub fn rate_window(&self) -> Duration {
        self.rate_window
    }

    #[must_use]
    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }

    /// Reject settings the service cannot run with.
    ///
    /// # Errors
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.signing_key.expose_secret().len() < MIN_SIGNING_KEY_LEN {
            bail!("signing key must be at least {MIN_SIGNING_KEY_LEN} bytes");
        }
        if self.app_name.trim().is_empty() || self.app_name.contains(':') {
            bail!("app name must be non-empty and must not contain ':'");
        }
        if self.token_timeout.is_zero() {
            bail!("token timeout must be positive");
        }
        if self.max_refresh < self.token_timeout {
            bail!("max refresh must not be shorter than the token timeout");
        }
        if self.cache_ttl.is_zero() {
            bail!("cache TTL must be positive");
        }
        if self.max_login_attempts == 0 {
            bail!("max login attempts must be positive");
        }
        if self.lock_duration.is_zero() {
            bail!("lock duration must be positive");
        }
        if self.rate_limit > 0 && self.rate_window.is_zero() {
            bail!("rate window must be positive");
        }
        Ok(())
    }
}

/// Everything a request handler needs, shared behind an `Arc`.
pub struct AppState {
    config: AuthConfig,
    lifecycle: TokenLifecycle,
    rate_limiter: Arc<dyn RateLimiter>,
    store: Arc<dyn KeyedStore>,
}

impl AppState {
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn KeyedStore>,
        lookup: Arc<dyn IdentityLookup>,
        passwords: PasswordChecker,
        clock: Clock,
    ) -> Self {
        let lifecycle = TokenLifecycle::new(&config, store.clone(), lookup, passwords, clock);
        let rate_limiter: Arc<dyn RateLimiter> = if config.rate_limit() == 0 {
            Arc::new(NoopRateLimiter)
        } else {
            Arc::new(StoreRateLimiter::new(
                store.clone(),
                &config.key_prefix(),
                config.rate_limit(),
                config.rate_window(),
            ))
        };
        Self {
            config,
            lifecycle,
            rate_limiter,
            store,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn lifecycle(&self) -> &TokenLifecycle {
        &self.lifecycle
    }

    pub(crate) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    pub(crate) fn store(&self) -> &dyn KeyedStore {
        self.store.as_ref()
    }
}
