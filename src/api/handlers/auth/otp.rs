//! One-time codes for email and phone verification.

use anyhow::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use crate::kv::{otp_key, EphemeralStore};

/// Which out-of-band channel a code proves control of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtpPurpose {
    Email,
    Phone,
}

impl OtpPurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
        }
    }
}

/// Uniform six-digit code; the range keeps a leading zero impossible.
fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

/// Issues and verifies single-use codes keyed by (session, purpose).
pub struct OtpStore {
    store: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

impl OtpStore {
    pub(super) fn new(store: Arc<dyn EphemeralStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Generate and store a fresh code, replacing any live one for the same
    /// (session, purpose). Returns the code for dispatch.
    pub(super) async fn issue(&self, session_id: &str, purpose: OtpPurpose) -> Result<String> {
        let code = generate_code();
        self.store
            .set_with_ttl(&otp_key(session_id, purpose.as_str()), &code, self.ttl)
            .await?;
        Ok(code)
    }

    /// Check a candidate code. A match consumes the stored code atomically,
    /// so a second verify with the same code fails. Expired, consumed, and
    /// never-issued codes are indistinguishable here.
    pub(super) async fn verify(
        &self,
        session_id: &str,
        purpose: OtpPurpose,
        candidate: &str,
    ) -> Result<bool> {
        let stored = self
            .store
            .get_del(&otp_key(session_id, purpose.as_str()))
            .await?;
        Ok(stored.is_some_and(|code| code == candidate.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use tokio::time::advance;

    fn otp_store(store: Arc<MemoryStore>) -> OtpStore {
        OtpStore::new(store, Duration::from_secs(120))
    }

    #[test]
    fn generated_codes_are_six_digits_without_leading_zero() {
        for _ in 0..256 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.parse::<u32>().is_ok_and(|n| (100_000..=999_999).contains(&n)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn verify_accepts_the_issued_code_once() -> Result<()> {
        let otps = otp_store(Arc::new(MemoryStore::new()));
        let code = otps.issue("sid", OtpPurpose::Email).await?;

        assert!(otps.verify("sid", OtpPurpose::Email, &code).await?);
        // Single-use: the same correct code fails the second time.
        assert!(!otps.verify("sid", OtpPurpose::Email, &code).await?);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn verify_rejects_mismatch_and_wrong_purpose() -> Result<()> {
        let otps = otp_store(Arc::new(MemoryStore::new()));
        let code = otps.issue("sid", OtpPurpose::Email).await?;

        assert!(!otps.verify("sid", OtpPurpose::Email, "000000").await?);
        // The mismatch above consumed the code; re-issue and check purposes
        // are isolated.
        let code = otps.issue("sid", OtpPurpose::Email).await?;
        assert!(!otps.verify("sid", OtpPurpose::Phone, &code).await?);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn reissue_overwrites_the_previous_code() -> Result<()> {
        let otps = otp_store(Arc::new(MemoryStore::new()));
        let first = otps.issue("sid", OtpPurpose::Phone).await?;
        let second = otps.issue("sid", OtpPurpose::Phone).await?;

        if first != second {
            assert!(!otps.verify("sid", OtpPurpose::Phone, &first).await?);
            let third = otps.issue("sid", OtpPurpose::Phone).await?;
            assert!(otps.verify("sid", OtpPurpose::Phone, &third).await?);
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn codes_expire() -> Result<()> {
        let otps = otp_store(Arc::new(MemoryStore::new()));
        let code = otps.issue("sid", OtpPurpose::Email).await?;
        advance(Duration::from_secs(121)).await;
        assert!(!otps.verify("sid", OtpPurpose::Email, &code).await?);
        Ok(())
    }
}
