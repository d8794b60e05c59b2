//! Ephemeral key-value store (Redis).
//!
//! Registration drafts, OTP codes, issuance cooldowns, and the session cache
//! all live here with explicit TTLs; nothing in this module survives past its
//! expiry. The store is a capability, not a database: callers only get
//! set-with-ttl, set-if-absent, get, get-and-delete, delete, and
//! ttl-remaining.
//!
//! ## Key Patterns
//!
//! ```text
//! registration:{session_id}            → RegistrationDraft JSON (TTL 600s)
//! otp:{session_id}:{purpose}           → 6-digit code (TTL 120s)
//! otp-cooldown:{session_id}:{purpose}  → issuance marker (TTL 120s)
//! session:{session_id}                 → cached session JSON (TTL 7d)
//! ```
//!
//! `RedisStore` is the production implementation. `MemoryStore` backs local
//! development and unit tests; its TTLs run on `tokio::time` so tests can
//! pause and advance the clock.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Capability contract for the ephemeral store.
///
/// `set_if_absent` must be a single atomic operation on the backing store; a
/// separate exists-then-set sequence would let two concurrent callers both
/// claim the key.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Store `value` only when `key` is absent. Returns `true` when this call
    /// claimed the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Fetch and delete in one atomic step; the backbone of single-use codes.
    async fn get_del(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remaining lifetime of `key`, or `None` when the key is absent.
    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>>;

    /// Liveness probe for `/health`.
    async fn ping(&self) -> Result<()>;
}

#[must_use]
pub fn registration_key(session_id: &str) -> String {
    format!("registration:{session_id}")
}

#[must_use]
pub fn otp_key(session_id: &str, purpose: &str) -> String {
    format!("otp:{session_id}:{purpose}")
}

#[must_use]
pub fn cooldown_key(session_id: &str, purpose: &str) -> String {
    format!("otp-cooldown:{session_id}:{purpose}")
}

#[must_use]
pub fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_patterns_are_namespaced() {
        assert_eq!(registration_key("abc"), "registration:abc");
        assert_eq!(otp_key("abc", "email"), "otp:abc:email");
        assert_eq!(cooldown_key("abc", "phone"), "otp-cooldown:abc:phone");
        assert_eq!(session_key("abc"), "session:abc");
    }
}
