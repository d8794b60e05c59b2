//! Redis-backed ephemeral store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::EphemeralStore;

/// Ephemeral store over a Redis connection manager.
///
/// The manager multiplexes one connection and reconnects on failure, so the
/// store is cheap to clone into handlers.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis and wrap the connection in a manager.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the initial connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis URL")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .with_context(|| format!("failed to SET {key}"))?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        // SET NX EX is one round trip; concurrent callers race on the server,
        // not in this process.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to SET NX {key}"))?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to GET {key}"))
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to GETDEL {key}"))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await
            .with_context(|| format!("failed to DEL {key}"))?;
        Ok(())
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.manager.clone();
        let ttl: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to TTL {key}"))?;
        // -2 means the key is gone; -1 means no expiry, which no writer in
        // this crate produces.
        if ttl < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(ttl.unsigned_abs())))
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .context("redis ping failed")?;
        Ok(())
    }
}
