//! Bearer-token gateway for protected routes.
//!
//! Every protected request walks the same chain: token signature → live
//! session (cache-first) → token/session binding → account standing. Any
//! break in the chain is a generic `Unauthorized`/`Forbidden`; the middleware
//! never lets a request through half-checked. The optional variant runs the
//! identical chain but swallows failures and continues unauthenticated.

use axum::{
    extract::{Extension, Request},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::error::AuthError;
use super::session::{extract_bearer_token, extract_cookie, ACCESS_COOKIE_NAME};
use super::state::AuthState;
use super::storage::{lookup_account_standing, touch_session, validate_session};
use super::types::DeviceInfo;

/// Authenticated request identity, attached to request extensions.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub session_id: String,
    pub role: String,
    pub device_info: DeviceInfo,
}

impl AuthContext {
    /// Role gate for downstream routers (admin endpoints and the like).
    ///
    /// # Errors
    /// Returns `Forbidden` when the account's role is not in `roles`.
    pub fn require_role(&self, roles: &[&str]) -> Result<(), AuthError> {
        if roles.contains(&self.role.as_str()) {
            Ok(())
        } else {
            Err(AuthError::Forbidden("insufficient role"))
        }
    }
}

/// Reject the request unless the full auth chain passes.
pub async fn require_auth(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(request.headers(), &pool, &auth_state).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// Same chain as [`require_auth`], but failures proceed unauthenticated.
pub async fn optional_auth(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Ok(context) = authenticate(request.headers(), &pool, &auth_state).await {
        request.extensions_mut().insert(context);
    }
    next.run(request).await
}

async fn authenticate(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<AuthContext, AuthError> {
    let Some(token) = extract_access_token(headers) else {
        return Err(AuthError::Unauthorized);
    };
    // Signature/expiry only; liveness comes from the session store next.
    let Ok(claims) = auth_state.tokens().verify_access(&token) else {
        return Err(AuthError::Unauthorized);
    };

    let Some(session) = validate_session(
        pool,
        auth_state.store().as_ref(),
        &claims.sid,
        auth_state.config().session_cache_ttl(),
    )
    .await?
    else {
        return Err(AuthError::Unauthorized);
    };

    // A valid signature over a reassigned or tampered session binding still
    // fails: the token's subject must own the session it names.
    if claims.sub != session.user_id {
        return Err(AuthError::Unauthorized);
    }

    let Some(standing) = lookup_account_standing(pool, session.user_id).await? else {
        return Err(AuthError::Unauthorized);
    };
    if standing.status != "active" {
        return Err(AuthError::Forbidden("account is not in good standing"));
    }
    if !standing.is_email_verified || !standing.is_phone_verified {
        return Err(AuthError::Forbidden("account is not fully verified"));
    }

    // Activity stamp is best-effort; auth must not fail on it.
    if let Err(err) = touch_session(pool, &claims.sid).await {
        warn!("failed to update session activity: {err}");
    }

    Ok(AuthContext {
        user_id: session.user_id,
        session_id: claims.sid,
        role: standing.role,
        device_info: session.device_info,
    })
}

fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    extract_cookie(headers, ACCESS_COOKIE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use secrecy::SecretString;

    use crate::api::notify::{LogEmailSender, LogSmsSender};
    use crate::kv::MemoryStore;

    fn auth_state() -> Arc<AuthState> {
        let config = super::super::state::AuthConfig::new(
            "https://cityconnect.dev".to_string(),
            SecretString::from("access-secret".to_string()),
            SecretString::from("refresh-secret".to_string()),
        );
        Arc::new(AuthState::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(LogEmailSender),
            Arc::new(LogSmsSender),
        ))
    }

    fn lazy_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool")
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let state = auth_state();
        let result = authenticate(&HeaderMap::new(), &lazy_pool(), &state).await;
        assert!(matches!(result, Err(AuthError::Unauthorized)));
    }

    #[tokio::test]
    async fn garbage_token_is_unauthorized() {
        let state = auth_state();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer not-a-jwt"),
        );
        let result = authenticate(&headers, &lazy_pool(), &state).await;
        assert!(matches!(result, Err(AuthError::Unauthorized)));
    }

    #[tokio::test]
    async fn valid_token_without_a_live_session_is_unauthorized() {
        let state = auth_state();
        // Signature checks out, but nothing in the cache and the database is
        // unreachable, so the chain must stop at the session step.
        let pair = state
            .tokens()
            .issue_pair(Uuid::new_v4(), "sid-1", "device-1")
            .expect("pair should sign");
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", pair.access_token)).expect("header"),
        );
        let result = authenticate(&headers, &lazy_pool(), &state).await;
        assert!(result.is_err());
    }

    #[test]
    fn access_token_cookie_is_a_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("access_token=tok"),
        );
        assert_eq!(extract_access_token(&headers), Some("tok".to_string()));
    }

    #[test]
    fn require_role_gates_on_membership() {
        let context = AuthContext {
            user_id: Uuid::new_v4(),
            session_id: "sid".to_string(),
            role: "business".to_string(),
            device_info: DeviceInfo {
                user_agent: "ua".to_string(),
                ip: "1.2.3.4".to_string(),
                platform: "Linux".to_string(),
                browser: "Firefox".to_string(),
                device_id: "device".to_string(),
            },
        };
        assert!(context.require_role(&["business", "admin"]).is_ok());
        assert!(matches!(
            context.require_role(&["admin"]),
            Err(AuthError::Forbidden(_))
        ));
    }
}
