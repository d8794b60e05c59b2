//! Request/response contracts for registration, login, and session endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Roles a caller may self-register with. `admin` exists in the database but
/// is never accepted from a registration payload.
#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Business,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Business => "business",
        }
    }
}

/// Device metadata captured at login and stored with the session.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug)]
pub struct DeviceInfo {
    pub user_agent: String,
    pub ip: String,
    pub platform: String,
    pub browser: String,
    pub device_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct InitiateRegistrationRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone: String,
    pub role: Role,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct InitiateRegistrationResponse {
    pub session_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SendOtpRequest {
    pub session_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyOtpRequest {
    pub session_id: String,
    pub otp: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerificationStageResponse {
    pub stage: super::draft::DraftStage,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct FinalizeRegistrationRequest {
    pub session_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Account fields safe to return to the owning client.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AccountSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub role: String,
    pub is_email_verified: bool,
    pub is_phone_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Token pair handed out at finalize/login/refresh. Tokens also travel as
/// cookies; the body copy serves non-browser clients.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionBundle {
    pub session_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthResponse {
    pub account: AccountSummary,
    pub session: SessionBundle,
}

/// Enumeration entry for "manage my devices". Token digests never appear here.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionSummary {
    pub session_id: String,
    pub device_info: DeviceInfo,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
