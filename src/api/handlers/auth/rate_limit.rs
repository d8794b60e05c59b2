//! Issuance cooldowns for OTP dispatch.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use super::otp::OtpPurpose;
use crate::kv::{cooldown_key, EphemeralStore};

/// Outcome of a cooldown check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// This caller claimed the window; exactly one issuance may proceed.
    Allowed,
    /// A marker is live; retry after the remaining seconds.
    Limited { remaining_seconds: u64 },
}

/// Per (session, purpose) cooldown gate backed by the shared ephemeral store.
///
/// State lives in the store, never in process memory, so the limit holds
/// across server instances. The check is a single atomic set-if-absent: two
/// concurrent callers cannot both observe an open window.
pub struct OtpRateLimiter {
    store: Arc<dyn EphemeralStore>,
    window: Duration,
}

impl OtpRateLimiter {
    pub(super) fn new(store: Arc<dyn EphemeralStore>, window: Duration) -> Self {
        Self { store, window }
    }

    pub(super) async fn check(
        &self,
        session_id: &str,
        purpose: OtpPurpose,
    ) -> Result<RateLimitDecision> {
        let key = cooldown_key(session_id, purpose.as_str());
        if self.store.set_if_absent(&key, "1", self.window).await? {
            return Ok(RateLimitDecision::Allowed);
        }
        // Lost the race or inside the window: report the marker's remaining
        // lifetime. The marker can expire between the two calls; treat that
        // as the window having just closed.
        let remaining = self
            .store
            .ttl_remaining(&key)
            .await?
            .map_or(0, |ttl| ttl.as_secs());
        Ok(RateLimitDecision::Limited {
            remaining_seconds: remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use tokio::time::advance;

    fn limiter() -> OtpRateLimiter {
        OtpRateLimiter::new(Arc::new(MemoryStore::new()), Duration::from_secs(120))
    }

    #[tokio::test(start_paused = true)]
    async fn first_check_claims_the_window() -> Result<()> {
        let limiter = limiter();
        let decision = limiter.check("sid", OtpPurpose::Email).await?;
        assert_eq!(decision, RateLimitDecision::Allowed);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn second_check_reports_decreasing_remaining_time() -> Result<()> {
        let limiter = limiter();
        limiter.check("sid", OtpPurpose::Email).await?;

        let first = limiter.check("sid", OtpPurpose::Email).await?;
        let RateLimitDecision::Limited {
            remaining_seconds: first_remaining,
        } = first
        else {
            panic!("expected limited decision");
        };
        assert!(first_remaining <= 120);

        advance(Duration::from_secs(30)).await;
        let second = limiter.check("sid", OtpPurpose::Email).await?;
        let RateLimitDecision::Limited {
            remaining_seconds: second_remaining,
        } = second
        else {
            panic!("expected limited decision");
        };
        assert!(second_remaining < first_remaining);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn window_reopens_after_expiry() -> Result<()> {
        let limiter = limiter();
        limiter.check("sid", OtpPurpose::Phone).await?;
        advance(Duration::from_secs(121)).await;
        let decision = limiter.check("sid", OtpPurpose::Phone).await?;
        assert_eq!(decision, RateLimitDecision::Allowed);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn purposes_and_sessions_are_independent() -> Result<()> {
        let limiter = limiter();
        limiter.check("sid", OtpPurpose::Email).await?;
        assert_eq!(
            limiter.check("sid", OtpPurpose::Phone).await?,
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check("other", OtpPurpose::Email).await?,
            RateLimitDecision::Allowed
        );
        Ok(())
    }
}
