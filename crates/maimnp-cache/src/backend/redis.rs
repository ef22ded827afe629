//! Pooled Redis client.

use ::redis::AsyncCommands;
use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, PoolConfig, PoolError, Runtime};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use super::{KvBackend, SCAN_BATCH_SIZE};
use crate::config::CacheConfig;
use crate::error::BackendError;

static COMPARE_AND_DELETE: LazyLock<::redis::Script> = LazyLock::new(|| {
    ::redis::Script::new(
        r"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        end
        return 0
        ",
    )
});

/// Thin async wrapper over a `deadpool-redis` pool.
///
/// ## Connection lifecycle
///
/// The pool is created on first use and memoized. A failed [`ping`] drops it,
/// so the next call builds a fresh one. [`close`] drops it too; the client
/// must be closed explicitly at shutdown.
///
/// ## Failure policy
///
/// Commands are never retried. Each one is bounded by `socket_timeout` and
/// every failure is returned to the caller as a [`BackendError`].
///
/// [`ping`]: KvBackend::ping
/// [`close`]: KvBackend::close
pub struct RedisClient {
    url: String,
    max_connections: usize,
    socket_timeout: Duration,
    connect_timeout: Duration,
    retry_on_timeout: bool,
    pool: Mutex<Option<Pool>>,
}

impl RedisClient {
    /// Creates a client. No connection is attempted until the first command.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            url: config.connection_url(),
            max_connections: config.max_connections,
            socket_timeout: config.socket_timeout(),
            connect_timeout: config.socket_connect_timeout(),
            retry_on_timeout: config.retry_on_timeout,
            pool: Mutex::new(None),
        }
    }

    /// Whether a pool is currently held.
    pub fn is_connected(&self) -> bool {
        self.pool.lock().is_some()
    }

    fn pool(&self) -> Result<Pool, BackendError> {
        let mut guard = self.pool.lock();
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let mut redis_config = deadpool_redis::Config::from_url(self.url.clone());
        let mut pool_config = PoolConfig::new(self.max_connections);
        pool_config.timeouts.wait = Some(self.connect_timeout);
        pool_config.timeouts.create = Some(self.connect_timeout);
        pool_config.timeouts.recycle = Some(self.connect_timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BackendError::Pool(e.to_string()))?;

        tracing::debug!(max_connections = self.max_connections, "Redis pool created");
        *guard = Some(pool.clone());
        Ok(pool)
    }

    async fn connection(&self) -> Result<Connection, BackendError> {
        let pool = self.pool()?;
        match pool.get().await {
            Ok(conn) => Ok(conn),
            Err(PoolError::Timeout(kind)) if self.retry_on_timeout => {
                tracing::debug!(?kind, "Redis connection acquisition timed out, retrying once");
                pool.get().await.map_err(BackendError::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run<T, F>(&self, command: F) -> Result<T, BackendError>
    where
        F: Future<Output = ::redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.socket_timeout, command).await {
            Ok(result) => result.map_err(BackendError::from),
            Err(_) => Err(BackendError::Timeout(self.socket_timeout)),
        }
    }

    fn mark_disconnected(&self) {
        if let Some(pool) = self.pool.lock().take() {
            pool.close();
        }
    }
}

#[async_trait]
impl KvBackend for RedisClient {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.connection().await?;
        self.run(conn.get::<_, Option<String>>(key)).await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, BackendError> {
        let mut conn = self.connection().await?;
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                self.run(conn.set_ex::<_, _, ()>(key, value, secs)).await?;
            }
            None => {
                self.run(conn.set::<_, _, ()>(key, value)).await?;
            }
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.connection().await?;
        let removed: i64 = self.run(conn.del(key)).await?;
        Ok(removed > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, BackendError> {
        let mut conn = self.connection().await?;
        let mut invocation = COMPARE_AND_DELETE.key(key);
        invocation.arg(expected);
        let removed: i64 = self.run(invocation.invoke_async(&mut conn)).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.connection().await?;
        self.run(conn.exists::<_, bool>(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, BackendError> {
        let mut conn = self.connection().await?;
        let secs = ttl.as_secs().max(1) as i64;
        self.run(conn.expire::<_, bool>(key, secs)).await
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, BackendError> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        // SCAN pages through the keyspace; KEYS would block the server.
        loop {
            let mut scan = ::redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE);
            let (next, keys): (u64, Vec<String>) =
                self.run(scan.query_async(&mut conn)).await?;

            for batch in keys.chunks(SCAN_BATCH_SIZE) {
                let deleted: u64 = self.run(conn.del(batch)).await?;
                removed += deleted;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        tracing::debug!(pattern = %pattern, removed, "Redis pattern delete complete");
        Ok(removed)
    }

    async fn ping(&self) -> bool {
        let result = match self.connection().await {
            Ok(mut conn) => {
                let pong: Result<String, BackendError> =
                    self.run(::redis::cmd("PING").query_async(&mut conn)).await;
                pong
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(reply) if reply.eq_ignore_ascii_case("PONG") => true,
            Ok(reply) => {
                tracing::warn!(reply = %reply, "Unexpected Redis PING reply");
                self.mark_disconnected();
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis PING failed");
                self.mark_disconnected();
                false
            }
        }
    }

    async fn close(&self) {
        if self.is_connected() {
            self.mark_disconnected();
            tracing::info!("Redis pool closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_lazy() {
        let client = RedisClient::new(&CacheConfig::default());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn unreachable_backend_errors_and_ping_is_false() {
        let config = CacheConfig {
            host: "127.0.0.1".into(),
            port: 1,
            socket_timeout: 200,
            socket_connect_timeout: 200,
            retry_on_timeout: false,
            ..CacheConfig::default()
        };
        let client = RedisClient::new(&config);

        assert!(client.get("k").await.is_err());
        assert!(!client.ping().await);
        // A failed ping drops the pool.
        assert!(!client.is_connected());

        client.close().await;
        client.close().await;
    }
}
