//! Runs the Redis backend against a real server.
//!
//! A throwaway `redis-server` is spawned on a free port unless `REDIS_URL` is set:
//!
//! ```text
//! cargo test --test redis_store -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use redis::AsyncCommands;
use std::{
    net::TcpListener,
    process::{Child, Command, Stdio},
    sync::{Arc, OnceLock},
    time::Duration,
};
use ulid::Ulid;
use warden::{
    store::{KeyedStore, RedisStore, StoreError, Write},
    warden::{
        lockout::{FailureOutcome, LockoutTracker},
        rate_limit::{RateLimitDecision, RateLimiter, StoreRateLimiter},
    },
};

struct RedisTestServer {
    child: Child,
    url: String,
}

impl Drop for RedisTestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

static REDIS_TEST_SERVER: OnceLock<RedisTestServer> = OnceLock::new();

fn free_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("get free port failed")
}

fn spawn_redis_server() -> RedisTestServer {
    let port = free_port();
    let mut child = Command::new("redis-server")
        .arg("--port")
        .arg(port.to_string())
        .arg("--save")
        .arg("")
        .arg("--appendonly")
        .arg("no")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn redis-server failed");

    if let Ok(Some(status)) = child.try_wait() {
        panic!("redis-server exited early: {status}");
    }

    RedisTestServer {
        child,
        url: format!("redis://127.0.0.1:{port}/"),
    }
}

async fn wait_redis_ready(url: &str) {
    let client = redis::Client::open(url).expect("redis client open failed");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "redis-server not ready at {url}"
        );

        if let Ok(mut connection) = client.get_connection_manager().await {
            if connection.ping::<String>().await.as_deref() == Ok("PONG") {
                return;
            }
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn redis_url() -> String {
    if let Ok(url) = std::env::var("REDIS_URL") {
        return url;
    }
    let server = REDIS_TEST_SERVER.get_or_init(spawn_redis_server);
    wait_redis_ready(&server.url).await;
    server.url.clone()
}

async fn store(pool_size: usize) -> RedisStore {
    RedisStore::connect(&redis_url().await, pool_size, Duration::from_secs(2))
        .await
        .expect("redis connect failed")
}

async fn raw_connection() -> redis::aio::ConnectionManager {
    redis::Client::open(redis_url().await)
        .expect("redis client open failed")
        .get_connection_manager()
        .await
        .expect("redis connect failed")
}

fn unique_prefix(test_name: &str) -> String {
    format!("warden:test:{test_name}:{}", Ulid::new())
}

#[tokio::test]
#[ignore]
async fn sliding_window_two_per_five_seconds() {
    let prefix = unique_prefix("window");
    let limiter = StoreRateLimiter::new(
        Arc::new(store(2).await),
        &prefix,
        2,
        Duration::from_secs(5),
    );

    assert_eq!(limiter.admit("10.0.0.1").await, RateLimitDecision::Allowed);
    assert_eq!(limiter.admit("10.0.0.1").await, RateLimitDecision::Allowed);
    assert_eq!(limiter.admit("10.0.0.1").await, RateLimitDecision::Limited);
    assert_eq!(limiter.admit("10.0.0.2").await, RateLimitDecision::Allowed);

    // Each admitted request pushes the key's expiry out to one window.
    let mut conn = raw_connection().await;
    let ttl: i64 = conn
        .pttl(format!("{prefix}:mid:rl:10.0.0.1"))
        .await
        .unwrap();
    assert!(ttl > 0 && ttl <= 5_000, "unexpected ttl {ttl}");

    // Rejected requests are not recorded.
    let members: u64 = conn
        .zcard(format!("{prefix}:mid:rl:10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(members, 2);
}

#[tokio::test]
#[ignore]
async fn sliding_window_admits_again_after_the_window() -> Result<(), StoreError> {
    let store = store(1).await;
    let key = format!("{}:rl", unique_prefix("expiry"));
    let window = Duration::from_millis(400);

    assert!(store.admit_sliding_window(&key, 1, window).await?);
    assert!(!store.admit_sliding_window(&key, 1, window).await?);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(store.admit_sliding_window(&key, 1, window).await?);
    assert!(!store.admit_sliding_window(&key, 1, window).await?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn concurrent_requests_never_exceed_limit() {
    let limiter = StoreRateLimiter::new(
        Arc::new(store(8).await),
        &unique_prefix("concurrent-window"),
        3,
        Duration::from_secs(60),
    );

    let mut handles = Vec::new();
    for _ in 0..24 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(
            async move { limiter.admit("10.0.0.9").await },
        ));
    }

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() == RateLimitDecision::Allowed {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn concurrent_failures_lock_exactly_once() -> Result<(), StoreError> {
    let prefix = unique_prefix("lockout");
    let lockout = LockoutTracker::new(
        Arc::new(store(8).await),
        &prefix,
        3,
        Duration::from_secs(300),
    );

    let mut handles = Vec::new();
    for _ in 0..12 {
        let lockout = lockout.clone();
        handles.push(tokio::spawn(async move {
            lockout.record_failure("dave").await
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap()?);
    }

    let locked = outcomes
        .iter()
        .filter(|outcome| **outcome == FailureOutcome::Locked)
        .count();
    assert_eq!(locked, 1);
    assert!(outcomes.iter().all(|outcome| match outcome {
        FailureOutcome::Counted(n) => *n < 3,
        _ => true,
    }));

    assert!(lockout.is_locked("dave").await?);
    assert_eq!(lockout.failure_count("dave").await?, 0);

    let mut conn = raw_connection().await;
    let ttl: i64 = conn
        .pttl(format!("{prefix}:account_lock:dave"))
        .await
        .unwrap();
    assert!(ttl > 0 && ttl <= 300_000, "unexpected ttl {ttl}");
    Ok(())
}

#[tokio::test]
#[ignore]
async fn compare_and_apply_rejects_stale_expectation() -> Result<(), StoreError> {
    let store = store(1).await;
    let prefix = unique_prefix("cas");
    let counter = format!("{prefix}:counter");
    let lock = format!("{prefix}:lock");

    store.set_ex(&counter, "1", Duration::from_secs(60)).await?;

    assert!(
        !store
            .compare_and_apply(
                &[(counter.as_str(), None)],
                &[Write::set(counter.clone(), "1", None)]
            )
            .await?
    );
    assert!(
        store
            .compare_and_apply(
                &[(counter.as_str(), Some("1")), (lock.as_str(), None)],
                &[
                    Write::delete(counter.clone()),
                    Write::set(lock.clone(), "1", Some(Duration::from_secs(60))),
                ]
            )
            .await?
    );
    assert_eq!(store.get(&counter).await?, None);
    assert!(store.exists(&lock).await?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn concurrent_increments_are_never_lost() -> Result<(), StoreError> {
    let store = Arc::new(store(8).await);
    let key = format!("{}:counter", unique_prefix("increments"));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let current = store.get(&key).await?;
                let next = current
                    .as_deref()
                    .and_then(|value| value.parse::<u32>().ok())
                    .unwrap_or(0)
                    + 1;
                let write = Write::set(
                    key.clone(),
                    next.to_string(),
                    Some(Duration::from_secs(60)),
                );
                if store
                    .compare_and_apply(&[(key.as_str(), current.as_deref())], &[write])
                    .await?
                {
                    return Ok::<(), StoreError>(());
                }
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap()?;
    }
    assert_eq!(store.get(&key).await?, Some("16".to_string()));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn failed_transaction_leaves_no_watch_behind() -> Result<(), StoreError> {
    // One connection, so every call below shares its watch state.
    let store = store(1).await;
    let prefix = unique_prefix("unwatch");
    let window_key = format!("{prefix}:rl");
    let other = format!("{prefix}:other");

    assert!(
        store
            .admit_sliding_window(&window_key, 10, Duration::from_secs(60))
            .await?
    );

    // GET on the window's sorted set fails after WATCH has been sent.
    let result = store
        .compare_and_apply(
            &[(window_key.as_str(), None)],
            &[Write::set(other.clone(), "1", Some(Duration::from_secs(60)))],
        )
        .await;
    assert!(matches!(result, Err(StoreError::Backend(_))));

    // Touch the key the failed transaction was watching.
    assert!(
        store
            .admit_sliding_window(&window_key, 10, Duration::from_secs(60))
            .await?
    );

    assert!(
        store
            .compare_and_apply(
                &[(other.as_str(), None)],
                &[Write::set(other.clone(), "1", Some(Duration::from_secs(60)))]
            )
            .await?
    );
    assert_eq!(store.get(&other).await?, Some("1".to_string()));
    Ok(())
}
