//! Registration drafts and their verification state machine.
//!
//! A draft is the pending account held in the ephemeral store while the
//! caller proves control of their email and phone. The verification state is
//! an explicit tagged stage with a pure transition function, so the ordering
//! rules are unit-testable without a live store. Legal transitions:
//!
//! ```text
//! Unverified --email--> EmailVerified --phone--> BothVerified
//! ```
//!
//! Everything else is rejected. A draft only leaves this module as a
//! persisted account via the finalize handler, or by expiring.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use super::types::Role;
use super::utils::generate_opaque_id;
use crate::kv::{registration_key, EphemeralStore};

/// Verification progress of a draft.
#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DraftStage {
    Unverified,
    EmailVerified,
    BothVerified,
}

/// Out-of-band proof events that advance a draft.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationEvent {
    EmailConfirmed,
    PhoneConfirmed,
}

/// Rejected transition, mapped to `PreconditionFailed` at the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionError {
    PhoneBeforeEmail,
    EmailAlreadyVerified,
    AlreadyComplete,
}

impl TransitionError {
    pub(super) const fn detail(self) -> &'static str {
        match self {
            Self::PhoneBeforeEmail => "email verification is still outstanding",
            Self::EmailAlreadyVerified => "email is already verified",
            Self::AlreadyComplete => "registration is already fully verified",
        }
    }
}

/// Pure transition function for the verification state machine.
///
/// # Errors
/// Returns the rejected transition; the storage layer is never consulted.
pub fn transition(
    stage: DraftStage,
    event: VerificationEvent,
) -> Result<DraftStage, TransitionError> {
    match (stage, event) {
        (DraftStage::Unverified, VerificationEvent::EmailConfirmed) => Ok(DraftStage::EmailVerified),
        (DraftStage::Unverified, VerificationEvent::PhoneConfirmed) => {
            Err(TransitionError::PhoneBeforeEmail)
        }
        (DraftStage::EmailVerified, VerificationEvent::PhoneConfirmed) => {
            Ok(DraftStage::BothVerified)
        }
        (DraftStage::EmailVerified, VerificationEvent::EmailConfirmed) => {
            Err(TransitionError::EmailAlreadyVerified)
        }
        (DraftStage::BothVerified, _) => Err(TransitionError::AlreadyComplete),
    }
}

/// Candidate account held in the ephemeral store during registration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationDraft {
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone: String,
    pub role: Role,
    pub stage: DraftStage,
    pub created_at: i64,
}

/// Result of applying a verification event to a stored draft.
#[derive(Debug)]
pub(super) enum MarkOutcome {
    Updated(RegistrationDraft),
    Missing,
    Rejected(TransitionError),
}

/// Draft persistence over the ephemeral store.
///
/// Every write refreshes the TTL, so an active registration keeps its draft
/// alive while an abandoned one simply expires.
pub struct DraftStore {
    store: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

impl DraftStore {
    pub(super) fn new(store: Arc<dyn EphemeralStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Store a fresh draft and return its opaque session identifier.
    pub(super) async fn begin(&self, draft: &RegistrationDraft) -> Result<String> {
        let session_id = generate_opaque_id()?;
        self.write(&session_id, draft).await?;
        Ok(session_id)
    }

    pub(super) async fn get(&self, session_id: &str) -> Result<Option<RegistrationDraft>> {
        let raw = self.store.get(&registration_key(session_id)).await?;
        match raw {
            Some(raw) => {
                let draft =
                    serde_json::from_str(&raw).context("failed to decode registration draft")?;
                Ok(Some(draft))
            }
            None => Ok(None),
        }
    }

    /// Apply a verification event with a read-transition-rewrite cycle.
    ///
    /// The draft is re-read here rather than trusting a caller-held copy, so
    /// a draft that expired between the caller's read and this write surfaces
    /// as `Missing` instead of being resurrected blank.
    pub(super) async fn mark_verified(
        &self,
        session_id: &str,
        event: VerificationEvent,
    ) -> Result<MarkOutcome> {
        let Some(mut draft) = self.get(session_id).await? else {
            return Ok(MarkOutcome::Missing);
        };
        match transition(draft.stage, event) {
            Ok(stage) => {
                draft.stage = stage;
                self.write(session_id, &draft).await?;
                Ok(MarkOutcome::Updated(draft))
            }
            Err(err) => Ok(MarkOutcome::Rejected(err)),
        }
    }

    pub(super) async fn discard(&self, session_id: &str) -> Result<()> {
        self.store.delete(&registration_key(session_id)).await
    }

    async fn write(&self, session_id: &str, draft: &RegistrationDraft) -> Result<()> {
        let raw = serde_json::to_string(draft).context("failed to encode registration draft")?;
        self.store
            .set_with_ttl(&registration_key(session_id), &raw, self.ttl)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use chrono::Utc;
    use tokio::time::advance;

    fn draft() -> RegistrationDraft {
        RegistrationDraft {
            username: "alice".to_string(),
            email: "a@x.com".to_string(),
            password: "Secret123".to_string(),
            phone: "9876543210".to_string(),
            role: Role::User,
            stage: DraftStage::Unverified,
            created_at: Utc::now().timestamp(),
        }
    }

    fn store() -> DraftStore {
        DraftStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(600))
    }

    #[test]
    fn transition_follows_the_happy_path() {
        let stage = transition(DraftStage::Unverified, VerificationEvent::EmailConfirmed);
        assert_eq!(stage, Ok(DraftStage::EmailVerified));
        let stage = transition(DraftStage::EmailVerified, VerificationEvent::PhoneConfirmed);
        assert_eq!(stage, Ok(DraftStage::BothVerified));
    }

    #[test]
    fn transition_rejects_phone_before_email() {
        let result = transition(DraftStage::Unverified, VerificationEvent::PhoneConfirmed);
        assert_eq!(result, Err(TransitionError::PhoneBeforeEmail));
    }

    #[test]
    fn transition_rejects_duplicate_email_verification() {
        let result = transition(DraftStage::EmailVerified, VerificationEvent::EmailConfirmed);
        assert_eq!(result, Err(TransitionError::EmailAlreadyVerified));
    }

    #[test]
    fn both_verified_is_terminal() {
        for event in [
            VerificationEvent::EmailConfirmed,
            VerificationEvent::PhoneConfirmed,
        ] {
            assert_eq!(
                transition(DraftStage::BothVerified, event),
                Err(TransitionError::AlreadyComplete)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn begin_and_get_round_trip() -> Result<()> {
        let drafts = store();
        let session_id = drafts.begin(&draft()).await?;
        let loaded = drafts.get(&session_id).await?;
        let loaded = loaded.expect("draft should exist");
        assert_eq!(loaded.stage, DraftStage::Unverified);
        assert_eq!(loaded.email, "a@x.com");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn mark_verified_advances_and_rewrites() -> Result<()> {
        let drafts = store();
        let session_id = drafts.begin(&draft()).await?;

        let outcome = drafts
            .mark_verified(&session_id, VerificationEvent::EmailConfirmed)
            .await?;
        assert!(
            matches!(outcome, MarkOutcome::Updated(ref d) if d.stage == DraftStage::EmailVerified)
        );

        let outcome = drafts
            .mark_verified(&session_id, VerificationEvent::PhoneConfirmed)
            .await?;
        assert!(
            matches!(outcome, MarkOutcome::Updated(ref d) if d.stage == DraftStage::BothVerified)
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn mark_verified_rejects_out_of_order_events() -> Result<()> {
        let drafts = store();
        let session_id = drafts.begin(&draft()).await?;
        let outcome = drafts
            .mark_verified(&session_id, VerificationEvent::PhoneConfirmed)
            .await?;
        assert!(matches!(
            outcome,
            MarkOutcome::Rejected(TransitionError::PhoneBeforeEmail)
        ));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn missing_draft_is_not_resurrected() -> Result<()> {
        let drafts = store();
        let outcome = drafts
            .mark_verified("unknown", VerificationEvent::EmailConfirmed)
            .await?;
        assert!(matches!(outcome, MarkOutcome::Missing));
        assert!(drafts.get("unknown").await?.is_none());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn verification_refreshes_the_ttl() -> Result<()> {
        let drafts = store();
        let session_id = drafts.begin(&draft()).await?;

        // Just before expiry the draft is still there; verifying rewrites it
        // with a fresh window.
        advance(Duration::from_secs(599)).await;
        let outcome = drafts
            .mark_verified(&session_id, VerificationEvent::EmailConfirmed)
            .await?;
        assert!(matches!(outcome, MarkOutcome::Updated(_)));

        advance(Duration::from_secs(599)).await;
        assert!(drafts.get(&session_id).await?.is_some());

        advance(Duration::from_secs(2)).await;
        assert!(drafts.get(&session_id).await?.is_none());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn discard_removes_the_draft() -> Result<()> {
        let drafts = store();
        let session_id = drafts.begin(&draft()).await?;
        drafts.discard(&session_id).await?;
        assert!(drafts.get(&session_id).await?.is_none());
        Ok(())
    }
}
