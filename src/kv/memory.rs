//! In-memory ephemeral store for local development and tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::EphemeralStore;

/// HashMap-backed store with the same TTL semantics as Redis.
///
/// Expiry runs on `tokio::time::Instant`, so tests started with
/// `#[tokio::test(start_paused = true)]` can advance the clock and observe
/// keys expiring without sleeping.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        // Single lock for the whole check-and-insert keeps this atomic, like
        // SET NX on the server.
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(Entry::live) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone()))
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        Ok(entries
            .remove(key)
            .filter(Entry::live)
            .map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.live())
            .map(|entry| entry.expires_at - Instant::now()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn set_and_get_round_trip() -> Result<()> {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v", Duration::from_secs(10))
            .await?;
        assert_eq!(store.get("k").await?.as_deref(), Some("v"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire_after_ttl() -> Result<()> {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v", Duration::from_secs(10))
            .await?;
        advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await?, None);
        assert_eq!(store.ttl_remaining("k").await?, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_claims_once() -> Result<()> {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "1", Duration::from_secs(5)).await?);
        assert!(!store.set_if_absent("k", "2", Duration::from_secs(5)).await?);
        // First writer's value sticks until expiry.
        assert_eq!(store.get("k").await?.as_deref(), Some("1"));

        advance(Duration::from_secs(6)).await;
        assert!(store.set_if_absent("k", "3", Duration::from_secs(5)).await?);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn get_del_consumes_the_key() -> Result<()> {
        let store = MemoryStore::new();
        store.set_with_ttl("k", "v", Duration::from_secs(5)).await?;
        assert_eq!(store.get_del("k").await?.as_deref(), Some("v"));
        assert_eq!(store.get_del("k").await?, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_remaining_decreases() -> Result<()> {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v", Duration::from_secs(120))
            .await?;
        advance(Duration::from_secs(30)).await;
        let remaining = store.ttl_remaining("k").await?;
        assert_eq!(remaining, Some(Duration::from_secs(90)));
        Ok(())
    }
}
