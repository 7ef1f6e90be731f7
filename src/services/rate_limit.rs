use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RateLimitConfig;

/// Shared counter store with TTL expiry. Injected into the limiter so the
/// redis backing can be swapped for an in-memory one in tests.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return the new count. The TTL is armed
    /// whenever the key has none, so a counter whose expiry was lost picks a
    /// fresh one up on the next increment instead of living forever.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, CounterStoreError>;

    async fn get(&self, key: &str) -> Result<i64, CounterStoreError>;

    /// Seconds until the counter expires; 0 when there is no active window.
    async fn ttl_seconds(&self, key: &str) -> Result<i64, CounterStoreError>;
}

#[derive(Debug, thiserror::Error)]
#[error("counter store unavailable: {0}")]
pub struct CounterStoreError(pub String);

pub struct RedisCounterStore {
    conn: ConnectionManager,
    command_timeout: Duration,
}

impl RedisCounterStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            command_timeout: Duration::from_secs(1),
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, CounterStoreError> {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(CounterStoreError(e.to_string())),
            Err(_) => Err(CounterStoreError("command timed out".into())),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, CounterStoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = self.bounded(conn.incr(key, 1)).await?;
        // EXPIRE NX only sets a TTL when the key has none. Issued on every
        // increment, it also repairs a counter whose EXPIRE was lost to a
        // timeout after the INCR succeeded.
        let _: i64 = self
            .bounded(
                redis::cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl.as_secs() as i64)
                    .arg("NX")
                    .query_async(&mut conn),
            )
            .await?;
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<i64, CounterStoreError> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = self.bounded(conn.get(key)).await?;
        Ok(count.unwrap_or(0))
    }

    async fn ttl_seconds(&self, key: &str) -> Result<i64, CounterStoreError> {
        let mut conn = self.conn.clone();
        let ttl: i64 = self.bounded(conn.ttl(key)).await?;
        Ok(ttl.max(0))
    }
}

/// Per-sender send quota over a fixed window.
///
/// Known imprecision: the counter resets sharply when the TTL expires, so a
/// sender can burst up to 2x the limit across a window boundary. Kept as
/// documented behavior rather than upgrading to a true sliding window.
///
/// Fails open: when the counter store is unreachable the message is allowed.
/// Availability is preferred over strict enforcement for this control.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    fn key(user_id: i64) -> String {
        format!("rate_limit:messages:{user_id}")
    }

    /// Admit or reject a send attempt. The INCR itself is the atomic
    /// admission decision; no separate read+write.
    pub async fn allow(&self, user_id: i64) -> bool {
        if !self.config.enabled {
            return true;
        }

        let window = Duration::from_secs(self.config.window_seconds);
        match self.store.incr_with_ttl(&Self::key(user_id), window).await {
            Ok(count) => count <= self.config.max_per_window,
            Err(e) => {
                tracing::warn!(error = %e, user_id, "rate limit store unavailable, failing open");
                true
            }
        }
    }

    pub async fn remaining(&self, user_id: i64) -> i64 {
        if !self.config.enabled {
            return self.config.max_per_window;
        }
        match self.store.get(&Self::key(user_id)).await {
            Ok(count) => (self.config.max_per_window - count).max(0),
            Err(_) => self.config.max_per_window,
        }
    }

    pub async fn reset_seconds(&self, user_id: i64) -> i64 {
        match self.store.ttl_seconds(&Self::key(user_id)).await {
            Ok(ttl) => ttl,
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    pub struct InMemoryCounterStore {
        entries: Mutex<HashMap<String, (i64, Option<Instant>)>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl InMemoryCounterStore {
        pub fn expire_now(&self, key: &str) {
            self.entries.lock().unwrap().remove(key);
        }

        /// Simulate a counter whose EXPIRE was lost after the INCR.
        pub fn drop_ttl(&self, key: &str) {
            if let Some(entry) = self.entries.lock().unwrap().get_mut(key) {
                entry.1 = None;
            }
        }
    }

    #[async_trait]
    impl CounterStore for InMemoryCounterStore {
        async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, CounterStoreError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(CounterStoreError("injected failure".into()));
            }
            let mut entries = self.entries.lock().unwrap();
            let now = Instant::now();
            let entry = entries
                .entry(key.to_string())
                .or_insert((0, Some(now + ttl)));
            match entry.1 {
                Some(deadline) if deadline <= now => *entry = (0, Some(now + ttl)),
                None => entry.1 = Some(now + ttl),
                _ => {}
            }
            entry.0 += 1;
            Ok(entry.0)
        }

        async fn get(&self, key: &str) -> Result<i64, CounterStoreError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(CounterStoreError("injected failure".into()));
            }
            Ok(self
                .entries
                .lock()
                .unwrap()
                .get(key)
                .map(|(c, _)| *c)
                .unwrap_or(0))
        }

        async fn ttl_seconds(&self, key: &str) -> Result<i64, CounterStoreError> {
            let entries = self.entries.lock().unwrap();
            Ok(entries
                .get(key)
                .and_then(|(_, deadline)| *deadline)
                .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_secs() as i64)
                .unwrap_or(0))
        }
    }
}
