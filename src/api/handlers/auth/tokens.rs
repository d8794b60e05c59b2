//! Signed access/refresh token pairs.
//!
//! Tokens are opaque to every other component; only this issuer and the auth
//! gateway look inside. Access and refresh tokens use independent secrets and
//! TTLs, so a leaked refresh secret cannot mint access tokens and vice versa.
//! Verification here covers signature, issuer, and expiry only; whether the
//! session is still active is the session store's call.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::AuthConfig;

/// Claims carried by both token kinds.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Claims {
    /// Account id.
    pub sub: Uuid,
    /// Session identifier binding the token to one device login.
    pub sid: String,
    /// Device fingerprint captured at login.
    pub did: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// A freshly minted pair. The refresh expiry doubles as the session expiry.
#[derive(Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

enum TokenKind {
    Access,
    Refresh,
}

pub struct TokenIssuer {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let access_secret = config.access_token_secret().expose_secret();
        let refresh_secret = config.refresh_token_secret().expose_secret();
        Self {
            access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
            issuer: config.token_issuer().to_string(),
            access_ttl_seconds: config.access_token_ttl_seconds(),
            refresh_ttl_seconds: config.refresh_token_ttl_seconds(),
        }
    }

    /// Sign an access/refresh pair bound to (user, session, device).
    ///
    /// # Errors
    /// Returns an error if JWT encoding fails.
    pub fn issue_pair(
        &self,
        user_id: Uuid,
        session_id: &str,
        device_id: &str,
    ) -> Result<TokenPair, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let access = self.sign(user_id, session_id, device_id, now, TokenKind::Access)?;
        let refresh = self.sign(user_id, session_id, device_id, now, TokenKind::Refresh)?;
        let expires_at = chrono::DateTime::from_timestamp(now + self.refresh_ttl_seconds, 0)
            .unwrap_or_else(Utc::now);
        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
            expires_at,
        })
    }

    /// Signature + issuer + expiry check for access tokens.
    ///
    /// # Errors
    /// Any failure is a single opaque error; callers map it to `Unauthorized`
    /// without inspecting the cause.
    pub fn verify_access(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        self.verify(token, &self.access_decoding)
    }

    /// Signature + issuer + expiry check for refresh tokens.
    ///
    /// # Errors
    /// Same contract as [`Self::verify_access`].
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        self.verify(token, &self.refresh_decoding)
    }

    fn sign(
        &self,
        user_id: Uuid,
        session_id: &str,
        device_id: &str,
        now: i64,
        kind: TokenKind,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl_seconds,
            TokenKind::Refresh => self.refresh_ttl_seconds,
        };
        let claims = Claims {
            sub: user_id,
            sid: session_id.to_string(),
            did: device_id.to_string(),
            iat: now,
            exp: now + ttl,
            iss: self.issuer.clone(),
        };
        let key = match kind {
            TokenKind::Access => &self.access_encoding,
            TokenKind::Refresh => &self.refresh_encoding,
        };
        encode(&Header::new(Algorithm::HS256), &claims, key)
    }

    fn verify(
        &self,
        token: &str,
        key: &DecodingKey,
    ) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        // Expiry is exact; no grace window for expired tokens.
        validation.leeway = 0;
        decode::<Claims>(token, key, &validation).map(|data| data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn issuer() -> TokenIssuer {
        let config = AuthConfig::new(
            "https://cityconnect.dev".to_string(),
            SecretString::from("access-secret".to_string()),
            SecretString::from("refresh-secret".to_string()),
        );
        TokenIssuer::new(&config)
    }

    #[test]
    fn issued_pair_verifies_with_matching_kind() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();
        let pair = issuer
            .issue_pair(user_id, "sid-1", "device-1")
            .expect("pair should sign");

        assert!(!pair.access_token.is_empty());
        assert!(!pair.refresh_token.is_empty());

        let claims = issuer
            .verify_access(&pair.access_token)
            .expect("access token should verify");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.sid, "sid-1");
        assert_eq!(claims.did, "device-1");
        assert_eq!(claims.iss, "cityconnect");

        let claims = issuer
            .verify_refresh(&pair.refresh_token)
            .expect("refresh token should verify");
        assert_eq!(claims.sid, "sid-1");
    }

    #[test]
    fn token_kinds_are_not_interchangeable() {
        let issuer = issuer();
        let pair = issuer
            .issue_pair(Uuid::new_v4(), "sid-1", "device-1")
            .expect("pair should sign");

        // Distinct secrets: a refresh token is garbage to the access
        // verifier and vice versa.
        assert!(issuer.verify_access(&pair.refresh_token).is_err());
        assert!(issuer.verify_refresh(&pair.access_token).is_err());
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let issuer = issuer();
        let pair = issuer
            .issue_pair(Uuid::new_v4(), "sid-1", "device-1")
            .expect("pair should sign");

        let mut tampered = pair.access_token.clone();
        tampered.pop();
        tampered.push('A');
        assert!(issuer.verify_access(&tampered).is_err());
        assert!(issuer.verify_access("not-a-token").is_err());
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let config = AuthConfig::new(
            "https://cityconnect.dev".to_string(),
            SecretString::from("access-secret".to_string()),
            SecretString::from("refresh-secret".to_string()),
        )
        .with_token_issuer("someone-else".to_string());
        let foreign = TokenIssuer::new(&config);
        let pair = foreign
            .issue_pair(Uuid::new_v4(), "sid-1", "device-1")
            .expect("pair should sign");

        // Same secrets, different issuer claim.
        assert!(issuer().verify_access(&pair.access_token).is_err());
    }

    #[test]
    fn expired_access_tokens_are_rejected() {
        let config = AuthConfig::new(
            "https://cityconnect.dev".to_string(),
            SecretString::from("access-secret".to_string()),
            SecretString::from("refresh-secret".to_string()),
        )
        .with_access_token_ttl_seconds(-120);
        let expired_issuer = TokenIssuer::new(&config);
        let pair = expired_issuer
            .issue_pair(Uuid::new_v4(), "sid-1", "device-1")
            .expect("pair should sign");

        assert!(expired_issuer.verify_access(&pair.access_token).is_err());
    }
}
