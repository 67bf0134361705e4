//! Cache-aside identity resolution.
//!
//! Flow Overview:
//! 1) Read `<prefix>:jwt:mid:ui:<id>`; a snapshot answers directly, a tombstone
//!    (`{"id":0}`) answers "not found" without touching the database.
//! 2) On a miss, ask the [`IdentityLookup`] and write the answer back (snapshot
//!    or tombstone) with the cache TTL.
//!
//! The cache is best effort: read errors count as misses and write errors are
//! logged and ignored. Lookup errors other than "not found" reach the caller as-is.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use super::identity::{Identity, IdentityLookup, IdentityStatus};
use crate::store::KeyedStore;

const TOMBSTONE_ID: i64 = 0;

/// What the cache holds for an id. Serialized with `id = 0` for tombstones.
#[derive(Debug, Serialize, Deserialize)]
struct CachedEntry {
    id: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<IdentityStatus>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    email: String,
}

impl CachedEntry {
    fn tombstone() -> Self {
        Self {
            id: TOMBSTONE_ID,
            username: String::new(),
            status: None,
            email: String::new(),
        }
    }

    fn snapshot(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username.clone(),
            status: Some(identity.status),
            email: identity.email.clone(),
        }
    }

    /// `Some(None)` for a tombstone, `None` when the entry is unusable.
    fn into_identity(self) -> Option<Option<Identity>> {
        if self.id == TOMBSTONE_ID {
            return Some(None);
        }
        let status = self.status?;
        Some(Some(Identity {
            id: self.id,
            username: self.username,
            password_hash: String::new(),
            status,
            email: self.email,
        }))
    }
}

/// Result of [`IdentityCache::resolve`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub identity: Option<Identity>,
    pub from_cache: bool,
}

#[derive(Clone)]
pub struct IdentityCache {
    store: Arc<dyn KeyedStore>,
    lookup: Arc<dyn IdentityLookup>,
    prefix: String,
    ttl: Duration,
}

impl IdentityCache {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        lookup: Arc<dyn IdentityLookup>,
        prefix: &str,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            lookup,
            prefix: format!("{prefix}:jwt:mid:ui"),
            ttl,
        }
    }

    fn key(&self, id: i64) -> String {
        format!("{}:{id}", self.prefix)
    }

    /// Resolve an identity by id, consulting the cache first.
    ///
    /// # Errors
    /// Returns the lookup collaborator's error unchanged when the cache misses
    /// and the backing lookup fails.
    pub async fn resolve(&self, id: i64) -> Result<Resolved> {
        if id <= TOMBSTONE_ID {
            return Ok(Resolved {
                identity: None,
                from_cache: false,
            });
        }

        let key = self.key(id);
        if let Some(identity) = self.read(&key).await {
            return Ok(Resolved {
                identity,
                from_cache: true,
            });
        }

        match self.lookup.find_by_id(id).await? {
            Some(identity) => {
                self.write(&key, &CachedEntry::snapshot(&identity)).await;
                Ok(Resolved {
                    identity: Some(identity),
                    from_cache: false,
                })
            }
            None => {
                self.write(&key, &CachedEntry::tombstone()).await;
                Ok(Resolved {
                    identity: None,
                    from_cache: false,
                })
            }
        }
    }

    /// Drop the cached entry for `id`.
    pub async fn invalidate(&self, id: i64) {
        if let Err(err) = self.store.delete(&[self.key(id)]).await {
            warn!("Failed to invalidate cached identity {id}: {err}");
        }
    }

    async fn read(&self, key: &str) -> Option<Option<Identity>> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!("Identity cache read failed for {key}: {err}");
                return None;
            }
        };

        let decoded = serde_json::from_str::<CachedEntry>(&raw)
            .ok()
            .and_then(CachedEntry::into_identity);
        if decoded.is_none() {
            debug!("Discarding undecodable identity cache entry {key}");
            if let Err(err) = self.store.delete(&[key.to_string()]).await {
                warn!("Failed to discard identity cache entry {key}: {err}");
            }
        }
        decoded
    }

    async fn write(&self, key: &str, entry: &CachedEntry) {
        let payload = match serde_json::to_string(entry) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to encode identity cache entry {key}: {err}");
                return;
            }
        };
        if let Err(err) = self.store.set_ex(key, &payload, self.ttl).await {
            warn!("Identity cache write failed for {key}: {err}");
        }
    }
}
