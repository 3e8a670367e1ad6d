//! Redis-backed fixed-window store.
//!
//! One atomic round-trip per request: a Lua script increments the counter,
//! sets the window TTL when the key is new, and reads the remaining TTL.
//! Keys are `ratelimit:<identity>` and expire with the window.

use super::{Decision, RateLimitStore, StoreError};
use crate::middleware::BoxFuture;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, RedisError, Script};
use std::fmt;
use std::time::{Duration, SystemTime};
use tokio::sync::OnceCell;

/// Default deadline for one store round-trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of every key written by the store.
pub const KEY_PREFIX: &str = "ratelimit:";

const INCREMENT_SCRIPT: &str = r"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {current, ttl}
";

/// Fixed-window counters in Redis.
///
/// The connection is established lazily on first use and shared by every
/// caller. A failed connection attempt is retried on the next request.
pub struct RedisStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    script: Script,
    timeout: Duration,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connected", &self.connection.initialized())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Creates a store for `url` (e.g. `redis://127.0.0.1:6379/`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the URL is invalid. No connection
    /// is attempted here.
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            script: Script::new(INCREMENT_SCRIPT),
            timeout: DEFAULT_STORE_TIMEOUT,
        })
    }

    /// Sets the per-call deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the per-call deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_number_of_retries(1)
                    .set_connection_timeout(self.timeout);
                self.client
                    .get_connection_manager_with_config(config)
                    .await
                    .map_err(|e| self.store_error(e))
            })
            .await?;
        Ok(manager.clone())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<(u64, i64), StoreError> {
        let mut conn = self.connection().await?;
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        self.script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.store_error(e))
    }

    /// Socket timeouts inside the client count as store timeouts.
    fn store_error(&self, error: RedisError) -> StoreError {
        if error.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::Backend(error.to_string())
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

impl RateLimitStore for RedisStore {
    fn allow<'a>(
        &'a self,
        identity: &'a str,
        limit: u64,
        window: Duration,
    ) -> BoxFuture<'a, Result<Decision, StoreError>> {
        Box::pin(async move {
            let key = format!("{KEY_PREFIX}{identity}");
            let (count, ttl_ms) = self.bounded(self.increment(&key, window)).await?;
            let ttl = u64::try_from(ttl_ms).map_or(window, Duration::from_millis);
            Ok(Decision {
                allowed: count <= limit,
                count,
                limit,
                reset_at: SystemTime::now() + ttl,
            })
        })
    }

    fn reset<'a>(&'a self, identity: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let key = format!("{KEY_PREFIX}{identity}");
            self.bounded(async {
                let mut conn = self.connection().await?;
                redis::cmd("DEL")
                    .arg(&key)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(|e| self.store_error(e))
            })
            .await
        })
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
