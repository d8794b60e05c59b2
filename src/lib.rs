//! # CityConnect (Accounts & Sessions Core)
//!
//! `cityconnect` is the backend for a local business directory. This crate
//! carries the account-creation and session lifecycle subsystem; the listing
//! CRUD services consume the auth gateway exported from [`api::handlers::auth`].
//!
//! ## Registration
//!
//! Signup is a multi-step pipeline: the candidate account lives as a draft in
//! the ephemeral store (10-minute TTL) until the caller proves control of
//! both their email and their phone with single-use six-digit codes. Email is
//! verified first, then phone; finalize persists the account only when both
//! proofs are in.
//!
//! - **Single-use codes:** verifying a code consumes it atomically; expired,
//!   consumed, and never-issued codes are indistinguishable.
//! - **Issuance cooldown:** one code per channel per two-minute window,
//!   enforced in the shared store so the limit holds across instances.
//!
//! ## Sessions
//!
//! Logins mint a signed access/refresh pair (15 minutes / 7 days, distinct
//! secrets) bound to a session row and device fingerprint. Multi-device is
//! first-class: sessions are enumerable and individually or bulk revocable,
//! and revocation invalidates the session cache before it returns. Refresh
//! rotates both tokens; a rotated-out refresh token cannot be replayed.
//!
//! ## Lockout
//!
//! Five consecutive failed passwords lock an account for two hours. An
//! expired lock restarts the counter rather than forgiving it.

pub mod api;
pub mod cli;
pub mod kv;
