//! Password login and account lockout.

use axum::{extract::Extension, http::HeaderMap, response::IntoResponse, Json};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;

use super::error::{AuthError, FieldError};
use super::session::issue_session;
use super::state::AuthState;
use super::storage::{
    lookup_account_by_email, record_failed_login, record_successful_login, AccountRecord,
};
use super::types::{AccountSummary, AuthResponse, LoginRequest};
use super::utils::{capture_device_info, normalize_email, valid_email};

/// What to write back after a failed password attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FailedLoginUpdate {
    Count { attempts: i32 },
    Lock { attempts: i32, lock_until_unix: i64 },
}

/// Pure lockout decision.
///
/// An expired lock means the previous punishment was served: the counter
/// restarts at 1 instead of continuing from the threshold. Reaching the
/// threshold sets a fresh lock.
pub(super) fn next_failed_login(
    failed_attempts: i32,
    lock_until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: i32,
    lockout_seconds: i64,
) -> FailedLoginUpdate {
    if lock_until.is_some_and(|until| until < now) {
        return FailedLoginUpdate::Count { attempts: 1 };
    }
    let attempts = failed_attempts.saturating_add(1);
    if attempts >= threshold {
        FailedLoginUpdate::Lock {
            attempts,
            lock_until_unix: (now + Duration::seconds(lockout_seconds)).timestamp(),
        }
    } else {
        FailedLoginUpdate::Count { attempts }
    }
}

fn validate_login(request: &LoginRequest) -> Result<String, AuthError> {
    let email = normalize_email(&request.email);
    let mut fields = Vec::new();
    if !valid_email(&email) {
        fields.push(FieldError::new("email", "invalid email address"));
    }
    if request.password.is_empty() {
        fields.push(FieldError::new("password", "password is required"));
    }
    if fields.is_empty() {
        Ok(email)
    } else {
        Err(AuthError::Validation(fields))
    }
}

/// Check account standing before touching the password at all.
fn check_standing(account: &AccountRecord, now: DateTime<Utc>) -> Result<(), AuthError> {
    if let Some(lock_until) = account.lock_until {
        if lock_until > now {
            let remaining = lock_until - now;
            return Err(AuthError::Locked {
                retry_after_minutes: remaining.num_minutes().max(1),
            });
        }
    }
    if account.status != "active" {
        return Err(AuthError::Forbidden("account is not in good standing"));
    }
    if !account.is_email_verified || !account.is_phone_verified {
        return Err(AuthError::Forbidden("account is not fully verified"));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/v1/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account suspended, blocked, or unverified"),
        (status = 423, description = "Account temporarily locked")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = match payload {
        Some(Json(payload)) => payload,
        None => {
            return Err(AuthError::Validation(vec![FieldError::new(
                "body",
                "missing payload",
            )]))
        }
    };
    let email = validate_login(&request)?;

    // Unknown account and wrong password are indistinguishable to the caller.
    let Some(account) = lookup_account_by_email(&pool, &email).await? else {
        return Err(AuthError::Unauthorized);
    };

    let now = Utc::now();
    check_standing(&account, now)?;

    let password_matches = bcrypt::verify(&request.password, &account.password_hash)
        .map_err(|err| AuthError::Internal(err.into()))?;
    if !password_matches {
        let update = next_failed_login(
            account.failed_login_attempts,
            account.lock_until,
            now,
            auth_state.config().max_failed_logins(),
            auth_state.config().lockout_seconds(),
        );
        let (attempts, lock_until) = match update {
            FailedLoginUpdate::Count { attempts } => (attempts, None),
            FailedLoginUpdate::Lock {
                attempts,
                lock_until_unix,
            } => (
                attempts,
                DateTime::<Utc>::from_timestamp(lock_until_unix, 0),
            ),
        };
        if lock_until.is_some() {
            warn!("locking account {} after {attempts} failed logins", account.id);
        }
        record_failed_login(&pool, account.id, attempts, lock_until).await?;
        return Err(AuthError::Unauthorized);
    }

    record_successful_login(&pool, account.id).await?;

    let device_info = capture_device_info(&headers);
    let (response_headers, bundle) =
        issue_session(&pool, &auth_state, account.id, device_info).await?;

    let body = AuthResponse {
        account: AccountSummary {
            id: account.id,
            username: account.username,
            email: account.email,
            phone: account.phone,
            role: account.role,
            is_email_verified: account.is_email_verified,
            is_phone_verified: account.is_phone_verified,
            last_login_at: Some(now),
        },
        session: bundle,
    };
    Ok((axum::http::StatusCode::OK, response_headers, Json(body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: i32 = 5;
    const LOCKOUT: i64 = 2 * 60 * 60;

    #[test]
    fn counts_up_below_the_threshold() {
        let now = Utc::now();
        for attempts in 0..3 {
            let update = next_failed_login(attempts, None, now, THRESHOLD, LOCKOUT);
            assert_eq!(
                update,
                FailedLoginUpdate::Count {
                    attempts: attempts + 1
                }
            );
        }
    }

    #[test]
    fn fifth_failure_locks_for_the_configured_window() {
        let now = Utc::now();
        let update = next_failed_login(4, None, now, THRESHOLD, LOCKOUT);
        let FailedLoginUpdate::Lock {
            attempts,
            lock_until_unix,
        } = update
        else {
            panic!("expected a lock");
        };
        assert_eq!(attempts, 5);
        assert_eq!(lock_until_unix, now.timestamp() + LOCKOUT);
    }

    #[test]
    fn expired_lock_restarts_the_counter_at_one() {
        let now = Utc::now();
        let stale_lock = Some(now - Duration::seconds(60));
        // Counter sat at the threshold while locked; the lock being served
        // means we start over rather than instantly re-locking.
        let update = next_failed_login(5, stale_lock, now, THRESHOLD, LOCKOUT);
        assert_eq!(update, FailedLoginUpdate::Count { attempts: 1 });
    }

    #[test]
    fn active_lock_keeps_counting() {
        let now = Utc::now();
        let live_lock = Some(now + Duration::seconds(600));
        let update = next_failed_login(5, live_lock, now, THRESHOLD, LOCKOUT);
        assert!(matches!(update, FailedLoginUpdate::Lock { attempts: 6, .. }));
    }

    #[test]
    fn standing_rejects_locked_accounts_with_remaining_minutes() {
        let now = Utc::now();
        let account = account_fixture();
        let mut locked = account.clone();
        locked.lock_until = Some(now + Duration::minutes(90));
        let err = check_standing(&locked, now).expect_err("should be locked");
        assert!(matches!(
            err,
            AuthError::Locked {
                retry_after_minutes
            } if retry_after_minutes > 0 && retry_after_minutes <= 90
        ));
    }

    #[test]
    fn standing_rejects_blocked_and_unverified() {
        let now = Utc::now();
        let mut blocked = account_fixture();
        blocked.status = "blocked".to_string();
        assert!(matches!(
            check_standing(&blocked, now),
            Err(AuthError::Forbidden(_))
        ));

        let mut unverified = account_fixture();
        unverified.is_phone_verified = false;
        assert!(matches!(
            check_standing(&unverified, now),
            Err(AuthError::Forbidden(_))
        ));
    }

    #[test]
    fn standing_accepts_expired_locks() {
        let now = Utc::now();
        let mut account = account_fixture();
        account.lock_until = Some(now - Duration::seconds(1));
        assert!(check_standing(&account, now).is_ok());
    }

    #[test]
    fn validate_login_flags_bad_fields() {
        let err = validate_login(&LoginRequest {
            email: "nope".to_string(),
            password: String::new(),
        })
        .expect_err("should fail validation");
        let AuthError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        assert_eq!(fields.len(), 2);
    }

    fn account_fixture() -> AccountRecord {
        AccountRecord {
            id: uuid::Uuid::new_v4(),
            username: "alice".to_string(),
            email: "a@x.com".to_string(),
            phone: "9876543210".to_string(),
            password_hash: "$2b$08$hash".to_string(),
            role: "user".to_string(),
            status: "active".to_string(),
            is_email_verified: true,
            is_phone_verified: true,
            failed_login_attempts: 0,
            lock_until: None,
            last_login_at: None,
        }
    }
}
