//! Account-creation and session lifecycle handlers.
//!
//! This module carries the one genuinely stateful part of the service: the
//! registration pipeline and the session/token machinery around it.
//!
//! ## Registration
//!
//! A draft lives in the ephemeral store (TTL 10 minutes, refreshed on each
//! verification) and must pass two out-of-band proofs, email first, then
//! phone. Codes are single-use with a two-minute life and a two-minute
//! issuance cooldown per channel. Only a fully verified draft can become an
//! account; the draft never touches the database.
//!
//! ## Sessions
//!
//! Logins mint an HS256 access/refresh pair bound to a session row and a
//! device fingerprint. Validation is cache-first against the ephemeral
//! store; revocation flips the durable row and deletes the cache entry
//! before returning. Refresh rotates both tokens, making the old refresh
//! token single-use.

pub(crate) mod draft;
pub(crate) mod error;
pub(crate) mod gateway;
pub(crate) mod login;
mod otp;
mod rate_limit;
pub(crate) mod registration;
pub(crate) mod session;
mod state;
pub(crate) mod storage;
pub(crate) mod tokens;
pub(crate) mod types;
mod utils;

pub use error::{AuthError, FieldError};
pub use gateway::{optional_auth, require_auth, AuthContext};
pub use state::{AuthConfig, AuthState};
pub use types::DeviceInfo;
