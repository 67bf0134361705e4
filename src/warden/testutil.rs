#![allow(clippy::unwrap_used)]

use anyhow::{anyhow, Result};
use argon2::Params;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use super::identity::{Identity, IdentityLookup, IdentityStatus};
use super::password::hash_password;
use crate::store::{KeyedStore, MemoryStore, StoreError, Write};

pub(crate) const PASSWORD: &str = "correct horse battery staple";

pub(crate) fn cheap_params() -> Params {
    Params::new(8, 1, 1, None).unwrap()
}

pub(crate) fn identity(id: i64, username: &str) -> Identity {
    Identity {
        id,
        username: username.to_string(),
        password_hash: hash_password(PASSWORD, cheap_params()).unwrap(),
        status: IdentityStatus::Active,
        email: format!("{username}@example.com"),
    }
}

/// In-memory [`IdentityLookup`] that counts calls.
#[derive(Default)]
pub(crate) struct StaticLookup {
    identities: Mutex<HashMap<i64, Identity>>,
    failing: AtomicBool,
    by_id: AtomicUsize,
    by_username: AtomicUsize,
}

impl StaticLookup {
    pub(crate) fn with(identities: Vec<Identity>) -> Self {
        let lookup = Self::default();
        {
            let mut map = lookup.identities.lock().unwrap();
            for identity in identities {
                map.insert(identity.id, identity);
            }
        }
        lookup
    }

    pub(crate) fn failing() -> Self {
        let lookup = Self::default();
        lookup.failing.store(true, Ordering::SeqCst);
        lookup
    }

    pub(crate) fn set_status(&self, id: i64, status: IdentityStatus) {
        if let Some(identity) = self.identities.lock().unwrap().get_mut(&id) {
            identity.status = status;
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn by_id_calls(&self) -> usize {
        self.by_id.load(Ordering::SeqCst)
    }

    pub(crate) fn by_username_calls(&self) -> usize {
        self.by_username.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityLookup for StaticLookup {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>> {
        self.by_username.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("database is down"));
        }
        Ok(self
            .identities
            .lock()
            .unwrap()
            .values()
            .find(|identity| identity.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Identity>> {
        self.by_id.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("database is down"));
        }
        Ok(self.identities.lock().unwrap().get(&id).cloned())
    }
}

/// [`MemoryStore`] wrapper whose reads or writes can be made to time out.
#[derive(Clone, Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl FlakyStore {
    pub(crate) fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Timeout(Duration::from_millis(500)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyedStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Self::check(&self.fail_reads)?;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        Self::check(&self.fail_writes)?;
        self.inner.set_ex(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        Self::check(&self.fail_writes)?;
        self.inner.delete(keys).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Self::check(&self.fail_reads)?;
        self.inner.exists(key).await
    }

    async fn compare_and_apply(
        &self,
        watched: &[(&str, Option<&str>)],
        writes: &[Write],
    ) -> Result<bool, StoreError> {
        Self::check(&self.fail_writes)?;
        self.inner.compare_and_apply(watched, writes).await
    }

    async fn admit_sliding_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<bool, StoreError> {
        Self::check(&self.fail_writes)?;
        self.inner.admit_sliding_window(key, limit, window).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Self::check(&self.fail_reads)
    }
}
