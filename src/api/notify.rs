//! OTP dispatch abstractions and the session sweep worker.
//!
//! Registration hands a `{destination, code}` pair to a sender; the sender
//! decides how to deliver (SMTP, SMS gateway, etc.) and returns `Ok`/`Err`.
//! The default senders for local dev log the payload and succeed. A dispatch
//! failure surfaces to the caller as a retryable error; the issuance cooldown
//! is deliberately left standing.
//!
//! The sweep worker is the Postgres stand-in for a TTL index: it deletes
//! session rows whose refresh window has passed on a fixed cadence.

use anyhow::Result;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use crate::api::handlers::auth::storage::delete_expired_sessions;

/// One-time code on its way to an email inbox or a phone.
#[derive(Clone, Debug)]
pub struct VerificationMessage {
    pub destination: String,
    pub code: String,
}

/// Email delivery abstraction for verification codes.
pub trait EmailSender: Send + Sync {
    /// Deliver a code or return an error so the caller can report a retry.
    fn send(&self, message: &VerificationMessage) -> Result<()>;
}

/// SMS delivery abstraction for verification codes.
pub trait SmsSender: Send + Sync {
    /// Same contract as [`EmailSender::send`].
    fn send(&self, message: &VerificationMessage) -> Result<()>;
}

/// Local dev sender that logs instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &VerificationMessage) -> Result<()> {
        info!(
            destination = %message.destination,
            code = %message.code,
            "email verification send stub"
        );
        Ok(())
    }
}

/// Local dev sender that logs instead of sending real SMS.
#[derive(Clone, Debug)]
pub struct LogSmsSender;

impl SmsSender for LogSmsSender {
    fn send(&self, message: &VerificationMessage) -> Result<()> {
        info!(
            destination = %message.destination,
            code = %message.code,
            "sms verification send stub"
        );
        Ok(())
    }
}

/// Spawn the background task that sweeps expired session rows.
pub fn spawn_session_sweeper(pool: PgPool, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = if interval.is_zero() {
            Duration::from_secs(60)
        } else {
            interval
        };
        loop {
            match delete_expired_sessions(&pool).await {
                Ok(0) => {}
                Ok(swept) => info!("session sweep removed {swept} expired rows"),
                Err(err) => error!("session sweep failed: {err}"),
            }
            sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_senders_always_succeed() {
        let message = VerificationMessage {
            destination: "a@x.com".to_string(),
            code: "123456".to_string(),
        };
        assert!(LogEmailSender.send(&message).is_ok());
        assert!(LogSmsSender.send(&message).is_ok());
    }
}
