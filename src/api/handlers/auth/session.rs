//! Session issuance, refresh, revocation, and enumeration endpoints.

use anyhow::anyhow;
use axum::{
    extract::{Extension, Path},
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;

use super::error::AuthError;
use super::gateway::AuthContext;
use super::state::{AuthConfig, AuthState};
use super::storage::{
    cache_session, insert_session, invalidate_cached_session, list_active_sessions,
    lookup_session_by_refresh_hash, revoke_session, revoke_user_sessions,
    rotate_session_tokens, CachedSession,
};
use super::tokens::TokenPair;
use super::types::{DeviceInfo, SessionBundle, SessionSummary};
use super::utils::{generate_opaque_id, hash_token};

pub(super) const ACCESS_COOKIE_NAME: &str = "access_token";
pub(super) const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Create a durable session plus its cookies for a freshly authenticated
/// account. Shared by login and registration finalize.
pub(super) async fn issue_session(
    pool: &PgPool,
    auth_state: &AuthState,
    user_id: uuid::Uuid,
    device_info: DeviceInfo,
) -> Result<(HeaderMap, SessionBundle), AuthError> {
    // The pair embeds the session id, so both are minted together; a unique
    // collision on insert throws the whole identity away and retries.
    for _ in 0..3 {
        let session_id = generate_opaque_id()?;
        let pair = auth_state
            .tokens()
            .issue_pair(user_id, &session_id, &device_info.device_id)
            .map_err(|err| AuthError::Internal(err.into()))?;

        let inserted = insert_session(
            pool,
            &session_id,
            user_id,
            &device_info,
            &hash_token(&pair.access_token),
            &hash_token(&pair.refresh_token),
            pair.expires_at,
        )
        .await?;
        if !inserted {
            continue;
        }

        let cached = CachedSession {
            user_id,
            device_info: device_info.clone(),
            is_active: true,
        };
        cache_session(
            auth_state.store().as_ref(),
            &session_id,
            &cached,
            auth_state.config().session_cache_ttl(),
        )
        .await?;

        let headers = auth_cookies(auth_state.config(), &pair)
            .map_err(|err| AuthError::Internal(err.into()))?;
        return Ok((
            headers,
            SessionBundle {
                session_id,
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
                expires_at: pair.expires_at,
            },
        ));
    }
    Err(AuthError::Internal(anyhow!(
        "failed to allocate a unique session id"
    )))
}

#[utoipa::path(
    post,
    path = "/v1/token/refresh",
    responses(
        (status = 200, description = "Tokens rotated", body = SessionBundle),
        (status = 401, description = "Refresh token invalid, expired, or already used")
    ),
    tag = "sessions"
)]
pub async fn refresh(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(token) = extract_token(&headers, REFRESH_COOKIE_NAME) else {
        return Err(AuthError::Unauthorized);
    };
    let Ok(claims) = auth_state.tokens().verify_refresh(&token) else {
        return Err(AuthError::Unauthorized);
    };

    // The durable row is the source of truth: a syntactically valid token
    // whose digest no longer matches (rotated or revoked) stops here.
    let Some(row) = lookup_session_by_refresh_hash(&pool, &hash_token(&token)).await? else {
        return Err(AuthError::Unauthorized);
    };
    if claims.sub != row.user_id || claims.sid != row.session_id {
        return Err(AuthError::Unauthorized);
    }

    let pair = auth_state
        .tokens()
        .issue_pair(row.user_id, &row.session_id, &row.device_info.device_id)
        .map_err(|err| AuthError::Internal(err.into()))?;

    let rotated = rotate_session_tokens(
        &pool,
        &row.session_id,
        &hash_token(&pair.access_token),
        &hash_token(&pair.refresh_token),
        pair.expires_at,
    )
    .await?;
    if !rotated {
        return Err(AuthError::Unauthorized);
    }

    // Only re-seed the cache after the rotation committed.
    let cached = CachedSession {
        user_id: row.user_id,
        device_info: row.device_info,
        is_active: true,
    };
    cache_session(
        auth_state.store().as_ref(),
        &row.session_id,
        &cached,
        auth_state.config().session_cache_ttl(),
    )
    .await?;

    let response_headers = auth_cookies(auth_state.config(), &pair)
        .map_err(|err| AuthError::Internal(err.into()))?;
    let bundle = SessionBundle {
        session_id: row.session_id,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_at: pair.expires_at,
    };
    Ok((StatusCode::OK, response_headers, Json(bundle)))
}

#[utoipa::path(
    post,
    path = "/v1/logout",
    responses(
        (status = 204, description = "Session revoked and cookies cleared"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "sessions"
)]
pub async fn logout(
    context: Extension<AuthContext>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    // Logout is idempotent; a session revoked in a parallel request is fine.
    revoke_session(&pool, context.user_id, &context.session_id).await?;
    invalidate_cached_session(auth_state.store().as_ref(), &context.session_id).await?;

    let headers = clear_auth_cookies(auth_state.config())
        .map_err(|err| AuthError::Internal(err.into()))?;
    Ok((StatusCode::NO_CONTENT, headers))
}

#[utoipa::path(
    post,
    path = "/v1/logout/all",
    responses(
        (status = 204, description = "All sessions revoked"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "sessions"
)]
pub async fn logout_all(
    context: Extension<AuthContext>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let revoked = revoke_user_sessions(&pool, context.user_id, None).await?;
    for session_id in &revoked {
        invalidate_cached_session(auth_state.store().as_ref(), session_id).await?;
    }

    let headers = clear_auth_cookies(auth_state.config())
        .map_err(|err| AuthError::Internal(err.into()))?;
    Ok((StatusCode::NO_CONTENT, headers))
}

#[utoipa::path(
    post,
    path = "/v1/logout/others",
    responses(
        (status = 204, description = "Every other session revoked"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "sessions"
)]
pub async fn logout_others(
    context: Extension<AuthContext>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let revoked =
        revoke_user_sessions(&pool, context.user_id, Some(&context.session_id)).await?;
    for session_id in &revoked {
        invalidate_cached_session(auth_state.store().as_ref(), session_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/sessions",
    responses(
        (status = 200, description = "Active sessions for this account", body = [SessionSummary]),
        (status = 401, description = "Not authenticated")
    ),
    tag = "sessions"
)]
pub async fn list_sessions(
    context: Extension<AuthContext>,
    pool: Extension<PgPool>,
) -> Result<impl IntoResponse, AuthError> {
    let sessions = list_active_sessions(&pool, context.user_id).await?;
    Ok((StatusCode::OK, Json(sessions)))
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Session to revoke")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 404, description = "No such active session for this account"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "sessions"
)]
pub async fn delete_session(
    context: Extension<AuthContext>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AuthError> {
    // Scoped to the caller's own sessions; someone else's id reads as absent.
    let revoked = revoke_session(&pool, context.user_id, &session_id).await?;
    if !revoked {
        return Err(AuthError::NotFound);
    }
    invalidate_cached_session(auth_state.store().as_ref(), &session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Both auth cookies for a freshly issued pair.
pub(super) fn auth_cookies(
    config: &AuthConfig,
    pair: &TokenPair,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        cookie_value(
            config,
            ACCESS_COOKIE_NAME,
            &pair.access_token,
            config.access_token_ttl_seconds(),
        )?,
    );
    headers.append(
        SET_COOKIE,
        cookie_value(
            config,
            REFRESH_COOKIE_NAME,
            &pair.refresh_token,
            config.refresh_token_ttl_seconds(),
        )?,
    );
    Ok(headers)
}

pub(super) fn clear_auth_cookies(config: &AuthConfig) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, cookie_value(config, ACCESS_COOKIE_NAME, "", 0)?);
    headers.append(
        SET_COOKIE,
        cookie_value(config, REFRESH_COOKIE_NAME, "", 0)?,
    );
    Ok(headers)
}

fn cookie_value(
    config: &AuthConfig,
    name: &str,
    value: &str,
    max_age_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    // Strict + Secure only when the frontend is actually on HTTPS; Lax keeps
    // local development working against a plain-HTTP SPA.
    let secure = config.cookie_secure();
    let same_site = if secure { "Strict" } else { "Lax" };
    let mut cookie = format!(
        "{name}={value}; Path=/; HttpOnly; SameSite={same_site}; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    extract_cookie(headers, cookie_name)
}

pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub(super) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}
