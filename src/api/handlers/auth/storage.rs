//! Database and cache helpers for accounts and sessions.
//!
//! Durable state lives in Postgres; the session fast path is mirrored into
//! the ephemeral store under `session:{session_id}`. Revocation always flips
//! the durable row first and then deletes the cache entry before returning,
//! so the very next validate cannot be served a stale hit.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::draft::RegistrationDraft;
use super::types::{DeviceInfo, SessionSummary};
use super::utils::is_unique_violation;
use crate::kv::{session_key, EphemeralStore};

/// Outcome when persisting a finalized draft as an account.
#[derive(Debug)]
pub(super) enum InsertAccountOutcome {
    Created(AccountRecord),
    /// Another registration won the race for one of the unique identifiers.
    Conflict,
}

/// Full account row as needed by login and finalize.
#[derive(Debug, Clone)]
pub(super) struct AccountRecord {
    pub(super) id: Uuid,
    pub(super) username: String,
    pub(super) email: String,
    pub(super) phone: String,
    pub(super) password_hash: String,
    pub(super) role: String,
    pub(super) status: String,
    pub(super) is_email_verified: bool,
    pub(super) is_phone_verified: bool,
    pub(super) failed_login_attempts: i32,
    pub(super) lock_until: Option<DateTime<Utc>>,
    pub(super) last_login_at: Option<DateTime<Utc>>,
}

/// Standing fields the gateway re-checks on every protected request.
#[derive(Debug, Clone)]
pub(super) struct AccountStanding {
    pub(super) role: String,
    pub(super) status: String,
    pub(super) is_email_verified: bool,
    pub(super) is_phone_verified: bool,
}

/// Durable session row (token values only ever appear as digests).
#[derive(Debug, Clone)]
pub(super) struct SessionRow {
    pub(super) session_id: String,
    pub(super) user_id: Uuid,
    pub(super) device_info: DeviceInfo,
    pub(super) expires_at: DateTime<Utc>,
}

/// Denormalized mirror of a session kept in the ephemeral store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct CachedSession {
    pub(super) user_id: Uuid,
    pub(super) device_info: DeviceInfo,
    pub(super) is_active: bool,
}

const ACCOUNT_COLUMNS: &str = "id, username, email, phone, password_hash, role::text AS role, \
     status::text AS status, is_email_verified, is_phone_verified, \
     failed_login_attempts, lock_until, last_login_at";

fn account_from_row(row: &sqlx::postgres::PgRow) -> AccountRecord {
    AccountRecord {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        phone: row.get("phone"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
        status: row.get("status"),
        is_email_verified: row.get("is_email_verified"),
        is_phone_verified: row.get("is_phone_verified"),
        failed_login_attempts: row.get("failed_login_attempts"),
        lock_until: row.get("lock_until"),
        last_login_at: row.get("last_login_at"),
    }
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> Result<SessionRow> {
    let device_raw: String = row.get("device_info");
    let device_info =
        serde_json::from_str(&device_raw).context("failed to decode session device info")?;
    Ok(SessionRow {
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        device_info,
        expires_at: row.get("expires_at"),
    })
}

/// Check whether any finalized account already claims one of the identifiers.
pub(super) async fn identifier_in_use(
    pool: &PgPool,
    email: &str,
    phone: &str,
    username: &str,
) -> Result<bool> {
    let query = "SELECT 1 FROM accounts WHERE email = $1 OR phone = $2 OR username = $3 LIMIT 1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(phone)
        .bind(username)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check identifier uniqueness")?;
    Ok(row.is_some())
}

/// Persist a fully verified draft. The unique indexes are the last word on
/// identifier races; a violation surfaces as `Conflict`, not an error.
pub(super) async fn insert_account(
    pool: &PgPool,
    draft: &RegistrationDraft,
    password_hash: &str,
) -> Result<InsertAccountOutcome> {
    let query = r"
        INSERT INTO accounts
            (username, email, phone, password_hash, role, status,
             is_email_verified, is_phone_verified, email_verified_at, phone_verified_at)
        VALUES ($1, $2, $3, $4, $5, 'active', TRUE, TRUE, NOW(), NOW())
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&draft.username)
        .bind(&draft.email)
        .bind(&draft.phone)
        .bind(password_hash)
        .bind(draft.role.as_str())
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(InsertAccountOutcome::Created(AccountRecord {
            id: row.get("id"),
            username: draft.username.clone(),
            email: draft.email.clone(),
            phone: draft.phone.clone(),
            password_hash: password_hash.to_string(),
            role: draft.role.as_str().to_string(),
            status: "active".to_string(),
            is_email_verified: true,
            is_phone_verified: true,
            failed_login_attempts: 0,
            lock_until: None,
            last_login_at: None,
        })),
        Err(err) if is_unique_violation(&err) => Ok(InsertAccountOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert account"),
    }
}

pub(super) async fn lookup_account_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<AccountRecord>> {
    let query = &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1 LIMIT 1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account by email")?;
    Ok(row.as_ref().map(account_from_row))
}

pub(super) async fn lookup_account_standing(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<AccountStanding>> {
    let query = "SELECT role::text AS role, status::text AS status, \
         is_email_verified, is_phone_verified FROM accounts WHERE id = $1 LIMIT 1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account standing")?;
    Ok(row.map(|row| AccountStanding {
        role: row.get("role"),
        status: row.get("status"),
        is_email_verified: row.get("is_email_verified"),
        is_phone_verified: row.get("is_phone_verified"),
    }))
}

/// Record a failed password attempt: the counter and optional lock computed
/// by the pure lockout decision in `login.rs`.
pub(super) async fn record_failed_login(
    pool: &PgPool,
    user_id: Uuid,
    attempts: i32,
    lock_until: Option<DateTime<Utc>>,
) -> Result<()> {
    let query = r"
        UPDATE accounts
        SET failed_login_attempts = $2,
            lock_until = $3,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(attempts)
        .bind(lock_until)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to record failed login")?;
    Ok(())
}

/// Reset the lockout counter and stamp the login time.
pub(super) async fn record_successful_login(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE accounts
        SET failed_login_attempts = 0,
            lock_until = NULL,
            last_login_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to record successful login")?;
    Ok(())
}

/// Insert a new session row. Returns `false` on a unique collision (session
/// id or refresh digest) so the caller can mint a fresh identity and retry.
pub(super) async fn insert_session(
    pool: &PgPool,
    session_id: &str,
    user_id: Uuid,
    device_info: &DeviceInfo,
    access_token_hash: &[u8],
    refresh_token_hash: &[u8],
    expires_at: DateTime<Utc>,
) -> Result<bool> {
    let device_raw =
        serde_json::to_string(device_info).context("failed to encode device info")?;
    let query = r"
        INSERT INTO sessions
            (session_id, user_id, access_token_hash, refresh_token_hash, device_info, expires_at)
        VALUES ($1, $2, $3, $4, $5::jsonb, $6)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(session_id)
        .bind(user_id)
        .bind(access_token_hash)
        .bind(refresh_token_hash)
        .bind(&device_raw)
        .bind(expires_at)
        .execute(pool)
        .instrument(span)
        .await;

    match result {
        Ok(_) => Ok(true),
        Err(err) if is_unique_violation(&err) => Ok(false),
        Err(err) => Err(err).context("failed to insert session"),
    }
}

/// Load a session that is still active and unexpired.
pub(super) async fn lookup_active_session(
    pool: &PgPool,
    session_id: &str,
) -> Result<Option<SessionRow>> {
    let query = r"
        SELECT session_id, user_id, device_info::text AS device_info, expires_at
        FROM sessions
        WHERE session_id = $1
          AND is_active
          AND expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(session_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;
    row.as_ref().map(session_from_row).transpose()
}

/// Load the session owning a presented refresh token (by digest).
pub(super) async fn lookup_session_by_refresh_hash(
    pool: &PgPool,
    refresh_token_hash: &[u8],
) -> Result<Option<SessionRow>> {
    let query = r"
        SELECT session_id, user_id, device_info::text AS device_info, expires_at
        FROM sessions
        WHERE refresh_token_hash = $1
          AND is_active
          AND expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(refresh_token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session by refresh token")?;
    row.as_ref().map(session_from_row).transpose()
}

/// Rotate both token digests and extend the session in one write. The old
/// refresh token stops matching the moment this commits, which is what makes
/// it single-use.
pub(super) async fn rotate_session_tokens(
    pool: &PgPool,
    session_id: &str,
    access_token_hash: &[u8],
    refresh_token_hash: &[u8],
    expires_at: DateTime<Utc>,
) -> Result<bool> {
    let query = r"
        UPDATE sessions
        SET access_token_hash = $2,
            refresh_token_hash = $3,
            expires_at = $4,
            last_used = NOW(),
            updated_at = NOW()
        WHERE session_id = $1
          AND is_active
          AND expires_at > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(session_id)
        .bind(access_token_hash)
        .bind(refresh_token_hash)
        .bind(expires_at)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to rotate session tokens")?;
    Ok(result.rows_affected() == 1)
}

/// Stamp activity on the session; losing this update is harmless.
pub(super) async fn touch_session(pool: &PgPool, session_id: &str) -> Result<()> {
    let query = "UPDATE sessions SET last_used = NOW() WHERE session_id = $1 AND is_active";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to touch session")?;
    Ok(())
}

/// Soft-delete one session owned by `user_id`. Returns `false` when the
/// session does not exist, is already revoked, or belongs to someone else.
pub(super) async fn revoke_session(
    pool: &PgPool,
    user_id: Uuid,
    session_id: &str,
) -> Result<bool> {
    let query = r"
        UPDATE sessions
        SET is_active = FALSE, updated_at = NOW()
        WHERE session_id = $1
          AND user_id = $2
          AND is_active
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(session_id)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke session")?;
    Ok(result.rows_affected() == 1)
}

/// Soft-delete every active session for a user, optionally keeping one.
/// Returns the revoked session ids so the caller can purge cache entries.
pub(super) async fn revoke_user_sessions(
    pool: &PgPool,
    user_id: Uuid,
    keep_session_id: Option<&str>,
) -> Result<Vec<String>> {
    let query = r"
        UPDATE sessions
        SET is_active = FALSE, updated_at = NOW()
        WHERE user_id = $1
          AND is_active
          AND ($2::text IS NULL OR session_id <> $2)
        RETURNING session_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .bind(keep_session_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to revoke user sessions")?;
    Ok(rows.iter().map(|row| row.get("session_id")).collect())
}

/// Enumerate active sessions for "manage my devices"; token digests stay out.
pub(super) async fn list_active_sessions(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<SessionSummary>> {
    let query = r"
        SELECT session_id, device_info::text AS device_info, last_used, created_at, expires_at
        FROM sessions
        WHERE user_id = $1
          AND is_active
          AND expires_at > NOW()
        ORDER BY last_used DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list sessions")?;

    let mut sessions = Vec::with_capacity(rows.len());
    for row in rows {
        let device_raw: String = row.get("device_info");
        let device_info =
            serde_json::from_str(&device_raw).context("failed to decode session device info")?;
        sessions.push(SessionSummary {
            session_id: row.get("session_id"),
            device_info,
            last_used: row.get("last_used"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        });
    }
    Ok(sessions)
}

/// Drop rows whose refresh window has passed. The sweep worker calls this on
/// an interval; revoked-but-unexpired rows stay for the device list.
pub(crate) async fn delete_expired_sessions(pool: &PgPool) -> Result<u64> {
    let query = "DELETE FROM sessions WHERE expires_at < NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete expired sessions")?;
    Ok(result.rows_affected())
}

pub(super) async fn cache_session(
    store: &dyn EphemeralStore,
    session_id: &str,
    entry: &CachedSession,
    ttl: Duration,
) -> Result<()> {
    let raw = serde_json::to_string(entry).context("failed to encode cached session")?;
    store
        .set_with_ttl(&session_key(session_id), &raw, ttl)
        .await
}

pub(super) async fn invalidate_cached_session(
    store: &dyn EphemeralStore,
    session_id: &str,
) -> Result<()> {
    store.delete(&session_key(session_id)).await
}

/// Cache-first session validation.
///
/// A cache hit must claim `is_active`; anything else falls through to the
/// durable row (active and unexpired only), which then repopulates the cache.
pub(super) async fn validate_session(
    pool: &PgPool,
    store: &dyn EphemeralStore,
    session_id: &str,
    cache_ttl: Duration,
) -> Result<Option<CachedSession>> {
    if let Some(raw) = store.get(&session_key(session_id)).await? {
        match serde_json::from_str::<CachedSession>(&raw) {
            Ok(cached) if cached.is_active => return Ok(Some(cached)),
            Ok(_) => {}
            Err(err) => {
                tracing::warn!("discarding undecodable session cache entry: {err}");
            }
        }
    }

    let Some(row) = lookup_active_session(pool, session_id).await? else {
        return Ok(None);
    };
    let cached = CachedSession {
        user_id: row.user_id,
        device_info: row.device_info,
        is_active: true,
    };
    cache_session(store, session_id, &cached, cache_ttl).await?;
    Ok(Some(cached))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use std::sync::Arc;

    fn device() -> DeviceInfo {
        DeviceInfo {
            user_agent: "Mozilla/5.0".to_string(),
            ip: "1.2.3.4".to_string(),
            platform: "Linux".to_string(),
            browser: "Firefox".to_string(),
            device_id: "abcdef0123456789".to_string(),
        }
    }

    #[test]
    fn outcome_debug_names() {
        assert_eq!(
            format!("{:?}", InsertAccountOutcome::Conflict),
            "Conflict"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cache_round_trip_and_invalidation() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let entry = CachedSession {
            user_id: Uuid::new_v4(),
            device_info: device(),
            is_active: true,
        };
        cache_session(store.as_ref(), "sid", &entry, Duration::from_secs(60)).await?;

        let raw = store.get(&session_key("sid")).await?;
        let cached: CachedSession =
            serde_json::from_str(raw.as_deref().unwrap_or_default())?;
        assert_eq!(cached.user_id, entry.user_id);
        assert!(cached.is_active);

        invalidate_cached_session(store.as_ref(), "sid").await?;
        assert!(store.get(&session_key("sid")).await?.is_none());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn validate_session_serves_active_cache_hits_without_the_database() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let entry = CachedSession {
            user_id: Uuid::new_v4(),
            device_info: device(),
            is_active: true,
        };
        cache_session(store.as_ref(), "sid", &entry, Duration::from_secs(60)).await?;

        // A lazy pool never connects; reaching the database would error out.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")?;
        let validated =
            validate_session(&pool, store.as_ref(), "sid", Duration::from_secs(60)).await?;
        assert_eq!(validated.map(|c| c.user_id), Some(entry.user_id));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn validate_session_never_trusts_inactive_cache_entries() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let entry = CachedSession {
            user_id: Uuid::new_v4(),
            device_info: device(),
            is_active: false,
        };
        cache_session(store.as_ref(), "sid", &entry, Duration::from_secs(60)).await?;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")?;
        // The inactive entry must not authenticate; the durable fallback then
        // fails because the pool cannot connect, which is the point: no
        // answer without consulting the durable store.
        let result =
            validate_session(&pool, store.as_ref(), "sid", Duration::from_secs(60)).await;
        assert!(result.is_err());
        Ok(())
    }
}
