//! Error taxonomy for the account and session flows.
//!
//! Handlers return `AuthError` so callers (and tests) branch on the kind, not
//! on message text. The `IntoResponse` impl is the single place that maps
//! kinds to status codes and client-visible bodies; store and dispatch
//! failures are logged here and leave the process as an opaque 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

/// Field-level detail for validation failures.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub(super) fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("identifier already in use")]
    Conflict,
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    PreconditionFailed(&'static str),
    #[error("rate limited for {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("unauthorized")]
    Unauthorized,
    #[error("account locked for {retry_after_minutes} more minutes")]
    Locked { retry_after_minutes: i64 },
    #[error("{0}")]
    Forbidden(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_minutes: Option<i64>,
}

impl ErrorBody {
    fn new(error: &'static str, message: String) -> Self {
        Self {
            error,
            message,
            fields: None,
            retry_after_seconds: None,
            retry_after_minutes: None,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Validation(fields) => {
                let mut body = ErrorBody::new("validation", "Invalid request".to_string());
                body.fields = Some(fields);
                (StatusCode::BAD_REQUEST, body)
            }
            Self::Conflict => (
                StatusCode::CONFLICT,
                ErrorBody::new("conflict", "Email, phone, or username already in use".to_string()),
            ),
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorBody::new("not_found", "Session or account not found".to_string()),
            ),
            Self::PreconditionFailed(detail) => (
                StatusCode::PRECONDITION_FAILED,
                ErrorBody::new("precondition_failed", detail.to_string()),
            ),
            Self::RateLimited {
                retry_after_seconds,
            } => {
                let mut body = ErrorBody::new(
                    "rate_limited",
                    format!("Try again in {retry_after_seconds} seconds"),
                );
                body.retry_after_seconds = Some(retry_after_seconds);
                (StatusCode::TOO_MANY_REQUESTS, body)
            }
            // Bad credentials and every token-shaped failure collapse to the
            // same generic body; the client cannot tell expired from revoked
            // from malformed.
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorBody::new("unauthorized", "Please log in again".to_string()),
            ),
            Self::Locked {
                retry_after_minutes,
            } => {
                let mut body = ErrorBody::new(
                    "locked",
                    format!("Account locked, try again in {retry_after_minutes} minutes"),
                );
                body.retry_after_minutes = Some(retry_after_minutes);
                (StatusCode::LOCKED, body)
            }
            Self::Forbidden(detail) => (
                StatusCode::FORBIDDEN,
                ErrorBody::new("forbidden", detail.to_string()),
            ),
            Self::Internal(err) => {
                error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("internal", "Internal error".to_string()),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
