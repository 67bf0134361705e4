//! Single-process [`KeyedStore`] used by tests and local development.
//!
//! Expiry is measured with `tokio::time::Instant`, so tests running with a
//! paused clock can step over TTLs with `tokio::time::advance`.

use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};

use super::{KeyedStore, StoreError, Write};

#[derive(Debug)]
enum Value {
    Text(String),
    Window(VecDeque<Instant>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime of `key`: `None` when missing, `Some(None)` when it never expires.
    pub async fn ttl(&self, key: &str) -> Option<Option<Duration>> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.live(now))
            .map(|entry| entry.expires_at.map(|at| at.duration_since(now)))
    }

    fn text(entries: &HashMap<String, Entry>, key: &str, now: Instant) -> Option<String> {
        match entries.get(key) {
            Some(Entry {
                value: Value::Text(text),
                expires_at,
            }) if expires_at.map_or(true, |at| at > now) => Some(text.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(Self::text(&entries, key, Instant::now()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries.get(key).is_some_and(|entry| entry.live(now)))
    }

    async fn compare_and_apply(
        &self,
        watched: &[(&str, Option<&str>)],
        writes: &[Write],
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        if watched
            .iter()
            .any(|(key, expected)| Self::text(&entries, key, now).as_deref() != *expected)
        {
            return Ok(false);
        }

        for write in writes {
            match write {
                Write::Set { key, value, ttl } => {
                    entries.insert(
                        key.clone(),
                        Entry {
                            value: Value::Text(value.clone()),
                            expires_at: ttl.map(|ttl| now + ttl),
                        },
                    );
                }
                Write::Delete { key } => {
                    entries.remove(key);
                }
            }
        }

        Ok(true)
    }

    async fn admit_sliding_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Window(VecDeque::new()),
            expires_at: None,
        });
        if !entry.live(now) || !matches!(entry.value, Value::Window(_)) {
            entry.value = Value::Window(VecDeque::new());
        }

        let Value::Window(markers) = &mut entry.value else {
            return Ok(false);
        };

        while markers
            .front()
            .is_some_and(|marker| now.duration_since(*marker) >= window)
        {
            markers.pop_front();
        }

        if u64::try_from(markers.len()).unwrap_or(u64::MAX) >= limit {
            return Ok(false);
        }

        markers.push_back(now);
        entry.expires_at = Some(now + window);
        Ok(true)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
