//! Per-account failed-login counting and temporary locks.
//!
//! The counter (`<prefix>:login_failures:<user>`) has no expiry until the account
//! reaches the threshold; at that point the counter is replaced by the lock
//! (`<prefix>:account_lock:<user>`), which expires on its own. The two keys are
//! never both present after a committed transition.

use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument, warn};

use crate::store::{KeyedStore, StoreError, Write};

/// Optimistic transactions give up after this many conflicts.
const MAX_CAS_ATTEMPTS: u32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Failure recorded; the counter now holds this value.
    Counted(u32),
    /// This failure reached the threshold and locked the account.
    Locked,
    /// The account was already locked; nothing was recorded.
    AlreadyLocked,
}

#[derive(Clone)]
pub struct LockoutTracker {
    store: Arc<dyn KeyedStore>,
    prefix: String,
    max_attempts: u32,
    lock_duration: Duration,
}

impl LockoutTracker {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        prefix: &str,
        max_attempts: u32,
        lock_duration: Duration,
    ) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            max_attempts: max_attempts.max(1),
            lock_duration,
        }
    }

    fn counter_key(&self, username: &str) -> String {
        format!("{}:login_failures:{username}", self.prefix)
    }

    fn lock_key(&self, username: &str) -> String {
        format!("{}:account_lock:{username}", self.prefix)
    }

    /// # Errors
    /// Returns a [`StoreError`] if the store cannot be reached.
    pub async fn is_locked(&self, username: &str) -> Result<bool, StoreError> {
        self.store.exists(&self.lock_key(username)).await
    }

    /// Current failure count, zero when no counter exists.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if the store cannot be reached.
    pub async fn failure_count(&self, username: &str) -> Result<u32, StoreError> {
        let raw = self.store.get(&self.counter_key(username)).await?;
        Ok(parse_count(raw.as_deref()))
    }

    /// Count one failed login, locking the account when the threshold is reached.
    ///
    /// Each attempt reads the counter and commits only if the counter is still
    /// unchanged and no lock appeared meanwhile, so concurrent failures are never
    /// lost and the lock is written exactly once.
    ///
    /// # Errors
    /// Returns [`StoreError::Contended`] when every attempt conflicted, or the
    /// underlying store error.
    #[instrument(skip(self))]
    pub async fn record_failure(&self, username: &str) -> Result<FailureOutcome, StoreError> {
        let counter_key = self.counter_key(username);
        let lock_key = self.lock_key(username);

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.store.get(&counter_key).await?;
            if self.store.get(&lock_key).await?.is_some() {
                return Ok(FailureOutcome::AlreadyLocked);
            }

            let next = parse_count(current.as_deref()).saturating_add(1);
            let (writes, outcome) = if next >= self.max_attempts {
                (
                    vec![
                        Write::set(lock_key.clone(), "1", Some(self.lock_duration)),
                        Write::delete(counter_key.clone()),
                    ],
                    FailureOutcome::Locked,
                )
            } else {
                (
                    vec![Write::set(counter_key.clone(), next.to_string(), None)],
                    FailureOutcome::Counted(next),
                )
            };

            if self
                .store
                .compare_and_apply(
                    &[
                        (counter_key.as_str(), current.as_deref()),
                        (lock_key.as_str(), None),
                    ],
                    &writes,
                )
                .await?
            {
                if outcome == FailureOutcome::Locked {
                    warn!(
                        "Account {username} locked for {}s after {next} failed logins",
                        self.lock_duration.as_secs()
                    );
                }
                return Ok(outcome);
            }

            debug!("Failure counter for {username} changed concurrently, retry {attempt}");
        }

        Err(StoreError::Contended {
            key: counter_key,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Forget past failures and lift any lock.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if the store cannot be reached.
    pub async fn clear_failures(&self, username: &str) -> Result<(), StoreError> {
        self.store
            .delete(&[self.counter_key(username), self.lock_key(username)])
            .await
    }
}

fn parse_count(raw: Option<&str>) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(0)
}
