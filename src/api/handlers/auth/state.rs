//! Auth configuration and shared handler state.

use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use super::draft::DraftStore;
use super::otp::OtpStore;
use super::rate_limit::OtpRateLimiter;
use super::tokens::TokenIssuer;
use crate::api::notify::{EmailSender, SmsSender};
use crate::kv::EphemeralStore;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_DRAFT_TTL_SECONDS: u64 = 10 * 60;
const DEFAULT_OTP_TTL_SECONDS: u64 = 120;
const DEFAULT_OTP_COOLDOWN_SECONDS: u64 = 120;
const DEFAULT_SESSION_CACHE_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_MAX_FAILED_LOGINS: i32 = 5;
const DEFAULT_LOCKOUT_SECONDS: i64 = 2 * 60 * 60;
const DEFAULT_TOKEN_ISSUER: &str = "cityconnect";

#[derive(Clone)]
pub struct AuthConfig {
    frontend_base_url: String,
    access_token_secret: SecretString,
    refresh_token_secret: SecretString,
    token_issuer: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    draft_ttl_seconds: u64,
    otp_ttl_seconds: u64,
    otp_cooldown_seconds: u64,
    session_cache_ttl_seconds: u64,
    max_failed_logins: i32,
    lockout_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(
        frontend_base_url: String,
        access_token_secret: SecretString,
        refresh_token_secret: SecretString,
    ) -> Self {
        Self {
            frontend_base_url,
            access_token_secret,
            refresh_token_secret,
            token_issuer: DEFAULT_TOKEN_ISSUER.to_string(),
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            draft_ttl_seconds: DEFAULT_DRAFT_TTL_SECONDS,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            otp_cooldown_seconds: DEFAULT_OTP_COOLDOWN_SECONDS,
            session_cache_ttl_seconds: DEFAULT_SESSION_CACHE_TTL_SECONDS,
            max_failed_logins: DEFAULT_MAX_FAILED_LOGINS,
            lockout_seconds: DEFAULT_LOCKOUT_SECONDS,
        }
    }

    #[must_use]
    pub fn with_token_issuer(mut self, issuer: String) -> Self {
        self.token_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_draft_ttl_seconds(mut self, seconds: u64) -> Self {
        self.draft_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: u64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_cooldown_seconds(mut self, seconds: u64) -> Self {
        self.otp_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_cache_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_cache_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_failed_logins(mut self, attempts: i32) -> Self {
        self.max_failed_logins = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: i64) -> Self {
        self.lockout_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(super) fn access_token_secret(&self) -> &SecretString {
        &self.access_token_secret
    }

    pub(super) fn refresh_token_secret(&self) -> &SecretString {
        &self.refresh_token_secret
    }

    pub(super) fn token_issuer(&self) -> &str {
        &self.token_issuer
    }

    pub(super) fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    pub(super) fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    pub(super) fn draft_ttl(&self) -> Duration {
        Duration::from_secs(self.draft_ttl_seconds)
    }

    pub(super) fn otp_ttl(&self) -> Duration {
        Duration::from_secs(self.otp_ttl_seconds)
    }

    pub(super) fn otp_cooldown(&self) -> Duration {
        Duration::from_secs(self.otp_cooldown_seconds)
    }

    pub(super) fn session_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.session_cache_ttl_seconds)
    }

    pub(super) fn max_failed_logins(&self) -> i32 {
        self.max_failed_logins
    }

    pub(super) fn lockout_seconds(&self) -> i64 {
        self.lockout_seconds
    }

    /// Cookies are only marked `Secure`/`SameSite=Strict` when the frontend
    /// is actually served over HTTPS; local dev keeps `Lax` so the SPA works.
    pub(super) fn cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("frontend_base_url", &self.frontend_base_url)
            .field("access_token_secret", &"***")
            .field("refresh_token_secret", &"***")
            .field("token_issuer", &self.token_issuer)
            .field("access_token_ttl_seconds", &self.access_token_ttl_seconds)
            .field("refresh_token_ttl_seconds", &self.refresh_token_ttl_seconds)
            .field("draft_ttl_seconds", &self.draft_ttl_seconds)
            .field("otp_ttl_seconds", &self.otp_ttl_seconds)
            .field("otp_cooldown_seconds", &self.otp_cooldown_seconds)
            .field(
                "session_cache_ttl_seconds",
                &self.session_cache_ttl_seconds,
            )
            .field("max_failed_logins", &self.max_failed_logins)
            .field("lockout_seconds", &self.lockout_seconds)
            .finish()
    }
}

/// Everything the auth handlers share: configuration, the token issuer, the
/// ephemeral store and the stores built over it, and the OTP dispatchers.
pub struct AuthState {
    config: AuthConfig,
    tokens: TokenIssuer,
    store: Arc<dyn EphemeralStore>,
    email_sender: Arc<dyn EmailSender>,
    sms_sender: Arc<dyn SmsSender>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn EphemeralStore>,
        email_sender: Arc<dyn EmailSender>,
        sms_sender: Arc<dyn SmsSender>,
    ) -> Self {
        let tokens = TokenIssuer::new(&config);
        Self {
            config,
            tokens,
            store,
            email_sender,
            sms_sender,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub(crate) fn store(&self) -> &Arc<dyn EphemeralStore> {
        &self.store
    }

    pub(super) fn drafts(&self) -> DraftStore {
        DraftStore::new(self.store.clone(), self.config.draft_ttl())
    }

    pub(super) fn otps(&self) -> OtpStore {
        OtpStore::new(self.store.clone(), self.config.otp_ttl())
    }

    pub(super) fn otp_limiter(&self) -> OtpRateLimiter {
        OtpRateLimiter::new(self.store.clone(), self.config.otp_cooldown())
    }

    pub(super) fn email_sender(&self) -> &dyn EmailSender {
        self.email_sender.as_ref()
    }

    pub(super) fn sms_sender(&self) -> &dyn SmsSender {
        self.sms_sender.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://cityconnect.dev".to_string(),
            SecretString::from("access-secret".to_string()),
            SecretString::from("refresh-secret".to_string()),
        )
    }

    #[test]
    fn defaults_and_overrides() {
        let config = config();
        assert_eq!(config.access_token_ttl_seconds(), 900);
        assert_eq!(config.refresh_token_ttl_seconds(), 604_800);
        assert_eq!(config.draft_ttl(), Duration::from_secs(600));
        assert_eq!(config.otp_ttl(), Duration::from_secs(120));
        assert_eq!(config.otp_cooldown(), Duration::from_secs(120));
        assert_eq!(config.max_failed_logins(), 5);
        assert_eq!(config.lockout_seconds(), 7200);
        assert_eq!(config.token_issuer(), "cityconnect");

        let config = config
            .with_access_token_ttl_seconds(60)
            .with_refresh_token_ttl_seconds(3600)
            .with_draft_ttl_seconds(30)
            .with_otp_ttl_seconds(10)
            .with_otp_cooldown_seconds(20)
            .with_max_failed_logins(3)
            .with_lockout_seconds(600)
            .with_token_issuer("test".to_string());
        assert_eq!(config.access_token_ttl_seconds(), 60);
        assert_eq!(config.refresh_token_ttl_seconds(), 3600);
        assert_eq!(config.draft_ttl(), Duration::from_secs(30));
        assert_eq!(config.otp_ttl(), Duration::from_secs(10));
        assert_eq!(config.otp_cooldown(), Duration::from_secs(20));
        assert_eq!(config.max_failed_logins(), 3);
        assert_eq!(config.lockout_seconds(), 600);
        assert_eq!(config.token_issuer(), "test");
    }

    #[test]
    fn cookie_secure_follows_the_frontend_scheme() {
        assert!(config().cookie_secure());
        let dev = AuthConfig::new(
            "http://localhost:5173".to_string(),
            SecretString::from("a".to_string()),
            SecretString::from("r".to_string()),
        );
        assert!(!dev.cookie_secure());
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("access-secret"));
        assert!(!rendered.contains("refresh-secret"));
        assert!(rendered.contains("***"));
    }
}
