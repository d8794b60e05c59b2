//! Multi-step registration endpoints.
//!
//! Flow: initiate stores a draft in the ephemeral store, each OTP step proves
//! one channel, and finalize turns a fully verified draft into a durable
//! account plus a first session. The account row is written before the draft
//! is deleted, so a failed insert leaves the draft intact for a retry without
//! re-verification.

use axum::{extract::Extension, http::HeaderMap, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;

use super::draft::{transition, DraftStage, MarkOutcome, RegistrationDraft, VerificationEvent};
use super::error::{AuthError, FieldError};
use super::otp::OtpPurpose;
use super::rate_limit::RateLimitDecision;
use super::session::issue_session;
use super::state::AuthState;
use super::storage::{identifier_in_use, insert_account, InsertAccountOutcome};
use super::types::{
    AccountSummary, AuthResponse, FinalizeRegistrationRequest, InitiateRegistrationRequest,
    InitiateRegistrationResponse, SendOtpRequest, VerificationStageResponse, VerifyOtpRequest,
};
use super::utils::{normalize_email, valid_email, valid_phone, valid_username};
use crate::api::notify::VerificationMessage;

/// Bcrypt cost for account passwords.
const PASSWORD_HASH_COST: u32 = 8;

fn validate_registration(
    request: &InitiateRegistrationRequest,
) -> Result<RegistrationDraft, AuthError> {
    let email = normalize_email(&request.email);
    let username = request.username.trim().to_string();
    let phone = request.phone.trim().to_string();

    let mut fields = Vec::new();
    if !valid_username(&username) {
        fields.push(FieldError::new(
            "username",
            "3-30 characters: letters, digits, underscores",
        ));
    }
    if !valid_email(&email) {
        fields.push(FieldError::new("email", "invalid email address"));
    }
    if request.password.len() < 8 {
        fields.push(FieldError::new("password", "at least 8 characters"));
    }
    if !valid_phone(&phone) {
        fields.push(FieldError::new("phone", "exactly 10 digits"));
    }
    if !fields.is_empty() {
        return Err(AuthError::Validation(fields));
    }

    Ok(RegistrationDraft {
        username,
        email,
        password: request.password.clone(),
        phone,
        role: request.role,
        stage: DraftStage::Unverified,
        created_at: Utc::now().timestamp(),
    })
}

fn missing_payload() -> AuthError {
    AuthError::Validation(vec![FieldError::new("body", "missing payload")])
}

#[utoipa::path(
    post,
    path = "/v1/register/initiate",
    request_body = InitiateRegistrationRequest,
    responses(
        (status = 201, description = "Draft created", body = InitiateRegistrationResponse),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Email, phone, or username already in use")
    ),
    tag = "registration"
)]
pub async fn initiate(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<InitiateRegistrationRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = match payload {
        Some(Json(payload)) => payload,
        None => return Err(missing_payload()),
    };
    let draft = validate_registration(&request)?;

    // Finalize re-checks under the unique indexes; this early probe just
    // spares the caller two OTP dances for an identity that cannot finalize.
    if identifier_in_use(&pool, &draft.email, &draft.phone, &draft.username).await? {
        return Err(AuthError::Conflict);
    }

    let session_id = auth_state.drafts().begin(&draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(InitiateRegistrationResponse { session_id }),
    ))
}

/// Shared issue-and-dispatch path for both OTP channels.
async fn send_otp(
    auth_state: &AuthState,
    session_id: &str,
    purpose: OtpPurpose,
) -> Result<StatusCode, AuthError> {
    let Some(draft) = auth_state.drafts().get(session_id).await? else {
        return Err(AuthError::NotFound);
    };

    // Issuance is only legal when the matching verification step is; the
    // transition table answers that without a second source of truth.
    let event = match purpose {
        OtpPurpose::Email => VerificationEvent::EmailConfirmed,
        OtpPurpose::Phone => VerificationEvent::PhoneConfirmed,
    };
    if let Err(err) = transition(draft.stage, event) {
        return Err(AuthError::PreconditionFailed(err.detail()));
    }

    match auth_state.otp_limiter().check(session_id, purpose).await? {
        RateLimitDecision::Allowed => {}
        RateLimitDecision::Limited { remaining_seconds } => {
            return Err(AuthError::RateLimited {
                retry_after_seconds: remaining_seconds,
            })
        }
    }

    let code = auth_state.otps().issue(session_id, purpose).await?;
    let message = VerificationMessage {
        destination: match purpose {
            OtpPurpose::Email => draft.email.clone(),
            OtpPurpose::Phone => draft.phone.clone(),
        },
        code,
    };
    // A failed dispatch keeps the cooldown marker: immediate re-dispatch is
    // exactly the abuse the cooldown guards against. The caller may retry
    // once the window passes.
    let dispatched = match purpose {
        OtpPurpose::Email => auth_state.email_sender().send(&message),
        OtpPurpose::Phone => auth_state.sms_sender().send(&message),
    };
    dispatched.map_err(AuthError::Internal)?;

    Ok(StatusCode::ACCEPTED)
}

/// Shared check-and-advance path for both OTP channels.
async fn verify_otp(
    auth_state: &AuthState,
    request: &VerifyOtpRequest,
    purpose: OtpPurpose,
) -> Result<Json<VerificationStageResponse>, AuthError> {
    let Some(draft) = auth_state.drafts().get(&request.session_id).await? else {
        return Err(AuthError::NotFound);
    };

    let event = match purpose {
        OtpPurpose::Email => VerificationEvent::EmailConfirmed,
        OtpPurpose::Phone => VerificationEvent::PhoneConfirmed,
    };
    // Ordering is checked before the code so an out-of-order call reports
    // the outstanding step instead of burning a stored code.
    if let Err(err) = transition(draft.stage, event) {
        return Err(AuthError::PreconditionFailed(err.detail()));
    }

    if !auth_state
        .otps()
        .verify(&request.session_id, purpose, &request.otp)
        .await?
    {
        return Err(AuthError::Unauthorized);
    }

    match auth_state
        .drafts()
        .mark_verified(&request.session_id, event)
        .await?
    {
        MarkOutcome::Updated(draft) => Ok(Json(VerificationStageResponse { stage: draft.stage })),
        // The draft expired between the code check and the rewrite.
        MarkOutcome::Missing => Err(AuthError::NotFound),
        MarkOutcome::Rejected(err) => Err(AuthError::PreconditionFailed(err.detail())),
    }
}

#[utoipa::path(
    post,
    path = "/v1/register/email-otp/send",
    request_body = SendOtpRequest,
    responses(
        (status = 202, description = "Code dispatched"),
        (status = 404, description = "Draft missing or expired"),
        (status = 412, description = "Step out of order"),
        (status = 429, description = "Issuance cooldown active")
    ),
    tag = "registration"
)]
pub async fn send_email_otp(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SendOtpRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = match payload {
        Some(Json(payload)) => payload,
        None => return Err(missing_payload()),
    };
    send_otp(&auth_state, &request.session_id, OtpPurpose::Email).await
}

#[utoipa::path(
    post,
    path = "/v1/register/email-otp/verify",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Email verified", body = VerificationStageResponse),
        (status = 401, description = "Code invalid, expired, or already used"),
        (status = 404, description = "Draft missing or expired"),
        (status = 412, description = "Step out of order")
    ),
    tag = "registration"
)]
pub async fn verify_email_otp(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = match payload {
        Some(Json(payload)) => payload,
        None => return Err(missing_payload()),
    };
    verify_otp(&auth_state, &request, OtpPurpose::Email).await
}

#[utoipa::path(
    post,
    path = "/v1/register/phone-otp/send",
    request_body = SendOtpRequest,
    responses(
        (status = 202, description = "Code dispatched"),
        (status = 404, description = "Draft missing or expired"),
        (status = 412, description = "Email verification still outstanding"),
        (status = 429, description = "Issuance cooldown active")
    ),
    tag = "registration"
)]
pub async fn send_phone_otp(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SendOtpRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = match payload {
        Some(Json(payload)) => payload,
        None => return Err(missing_payload()),
    };
    send_otp(&auth_state, &request.session_id, OtpPurpose::Phone).await
}

#[utoipa::path(
    post,
    path = "/v1/register/phone-otp/verify",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Phone verified", body = VerificationStageResponse),
        (status = 401, description = "Code invalid, expired, or already used"),
        (status = 404, description = "Draft missing or expired"),
        (status = 412, description = "Email verification still outstanding")
    ),
    tag = "registration"
)]
pub async fn verify_phone_otp(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = match payload {
        Some(Json(payload)) => payload,
        None => return Err(missing_payload()),
    };
    verify_otp(&auth_state, &request, OtpPurpose::Phone).await
}

#[utoipa::path(
    post,
    path = "/v1/register/finalize",
    request_body = FinalizeRegistrationRequest,
    responses(
        (status = 201, description = "Account created and session issued", body = AuthResponse),
        (status = 404, description = "Draft missing or expired"),
        (status = 409, description = "Another registration claimed an identifier"),
        (status = 412, description = "Verification incomplete")
    ),
    tag = "registration"
)]
pub async fn finalize(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<FinalizeRegistrationRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let request = match payload {
        Some(Json(payload)) => payload,
        None => return Err(missing_payload()),
    };

    let Some(draft) = auth_state.drafts().get(&request.session_id).await? else {
        return Err(AuthError::NotFound);
    };
    if draft.stage != DraftStage::BothVerified {
        return Err(AuthError::PreconditionFailed(
            "both verifications must complete before finalizing",
        ));
    }

    let password_hash = bcrypt::hash(&draft.password, PASSWORD_HASH_COST)
        .map_err(|err| AuthError::Internal(err.into()))?;

    // The unique indexes arbitrate the race where another registration
    // finalized the same identifiers after our initiate-time probe.
    let account = match insert_account(&pool, &draft, &password_hash).await? {
        InsertAccountOutcome::Created(account) => account,
        InsertAccountOutcome::Conflict => {
            auth_state.drafts().discard(&request.session_id).await?;
            return Err(AuthError::Conflict);
        }
    };

    // Account is durable; only now is the draft safe to drop.
    auth_state.drafts().discard(&request.session_id).await?;

    let device_info = super::utils::capture_device_info(&headers);
    let (response_headers, bundle) =
        issue_session(&pool, &auth_state, account.id, device_info).await?;

    let body = AuthResponse {
        account: AccountSummary {
            id: account.id,
            username: account.username,
            email: account.email,
            phone: account.phone,
            role: account.role,
            is_email_verified: true,
            is_phone_verified: true,
            last_login_at: None,
        },
        session: bundle,
    };
    Ok((StatusCode::CREATED, response_headers, Json(body)))
}
