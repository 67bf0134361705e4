//! Redis/Valkey-backed [`KeyedStore`].
//!
//! Connections are `ConnectionManager`s behind a tokio `Mutex`, picked round-robin.
//! Holding the lock for a whole `WATCH ... EXEC` sequence keeps the watch state
//! private to one transaction even though the manager itself is multiplexed.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info_span, Instrument};
use ulid::Ulid;

use super::{ttl_millis, KeyedStore, StoreError, Write};

// The server clock decides the window so instances with skewed clocks agree.
const SLIDING_WINDOW_SCRIPT: &str = r"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local nonce = ARGV[3]

local time = redis.call('TIME')
local now = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)

redis.call('ZREMRANGEBYSCORE', key, 0, now - window_ms)

if redis.call('ZCARD', key) >= limit then
    return 0
end

redis.call('ZADD', key, now, now .. ':' .. nonce)
redis.call('PEXPIRE', key, window_ms)
return 1
";

#[derive(Clone)]
pub struct RedisStore {
    connections: Arc<Vec<Mutex<ConnectionManager>>>,
    next_index: Arc<AtomicUsize>,
    op_timeout: Duration,
    window_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connections", &self.connections.len())
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis/Valkey and open `pool_size` managed connections.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or a connection cannot be established.
    pub async fn connect(
        redis_url: &str,
        pool_size: usize,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;

        let mut connections = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            let manager = tokio::time::timeout(op_timeout * 10, client.get_connection_manager())
                .await
                .map_err(|_| StoreError::Timeout(op_timeout * 10))??;
            connections.push(Mutex::new(manager));
        }

        Ok(Self {
            connections: Arc::new(connections),
            next_index: Arc::new(AtomicUsize::new(0)),
            op_timeout,
            window_script: Script::new(SLIDING_WINDOW_SCRIPT),
        })
    }

    async fn lock_connection(&self) -> Result<MutexGuard<'_, ConnectionManager>, StoreError> {
        let len = self.connections.len();
        let index = self.next_index.fetch_add(1, Ordering::Relaxed) % len.max(1);
        match self.connections.get(index) {
            Some(conn) => Ok(conn.lock().await),
            None => Err(StoreError::Backend(redis::RedisError::from((
                redis::ErrorKind::ClientError,
                "no redis connections",
            )))),
        }
    }

    /// Run one store operation under the configured deadline.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let span = info_span!("store.command", db.system = "redis", db.operation = operation);
        tokio::time::timeout(self.op_timeout, fut.instrument(span))
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))?
    }
}

#[async_trait]
impl KeyedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.bounded("GET", async {
            let mut conn = self.lock_connection().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.bounded("SET", async {
            let mut conn = self.lock_connection().await?;
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut *conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.bounded("DEL", async {
            let mut conn = self.lock_connection().await?;
            let _: () = conn.del(keys).await?;
            Ok(())
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.bounded("EXISTS", async {
            let mut conn = self.lock_connection().await?;
            let found: bool = conn.exists(key).await?;
            Ok(found)
        })
        .await
    }

    async fn compare_and_apply(
        &self,
        watched: &[(&str, Option<&str>)],
        writes: &[Write],
    ) -> Result<bool, StoreError> {
        self.bounded("EXEC", async {
            let mut conn = self.lock_connection().await?;

            // A transaction that failed or was cancelled after WATCH leaves its
            // watches on the pooled connection; clear them first.
            let mut watch = redis::pipe();
            watch.cmd("UNWATCH").ignore().cmd("WATCH");
            for (key, _) in watched {
                watch.arg(*key);
            }
            watch.ignore();
            let _: () = watch.query_async(&mut *conn).await?;

            for (key, expected) in watched {
                let current: Option<String> = conn.get(*key).await?;
                if current.as_deref() != *expected {
                    let _: () = redis::cmd("UNWATCH").query_async(&mut *conn).await?;
                    return Ok(false);
                }
            }

            let mut pipe = redis::pipe();
            pipe.atomic();
            for write in writes {
                match write {
                    Write::Set {
                        key,
                        value,
                        ttl: Some(ttl),
                    } => {
                        pipe.cmd("SET")
                            .arg(key)
                            .arg(value)
                            .arg("PX")
                            .arg(ttl_millis(*ttl))
                            .ignore();
                    }
                    Write::Set {
                        key,
                        value,
                        ttl: None,
                    } => {
                        pipe.cmd("SET").arg(key).arg(value).ignore();
                    }
                    Write::Delete { key } => {
                        pipe.cmd("DEL").arg(key).ignore();
                    }
                }
            }

            // EXEC answers nil when a watched key changed.
            let committed: Option<()> = pipe.query_async(&mut *conn).await?;
            Ok(committed.is_some())
        })
        .await
    }

    async fn admit_sliding_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<bool, StoreError> {
        self.bounded("EVALSHA", async {
            let mut conn = self.lock_connection().await?;
            let admitted: i64 = self
                .window_script
                .key(key)
                .arg(limit)
                .arg(ttl_millis(window))
                .arg(Ulid::new().to_string())
                .invoke_async(&mut *conn)
                .await?;
            Ok(admitted == 1)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded("PING", async {
            let mut conn = self.lock_connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
            Ok(())
        })
        .await
    }
}
