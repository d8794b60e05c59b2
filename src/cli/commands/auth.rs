//! Auth and session tuning arguments.

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_ACCESS_TOKEN_SECRET: &str = "access-token-secret";
pub const ARG_REFRESH_TOKEN_SECRET: &str = "refresh-token-secret";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl-seconds";
pub const ARG_DRAFT_TTL: &str = "draft-ttl-seconds";
pub const ARG_OTP_TTL: &str = "otp-ttl-seconds";
pub const ARG_OTP_COOLDOWN: &str = "otp-cooldown-seconds";
pub const ARG_SESSION_CACHE_TTL: &str = "session-cache-ttl-seconds";
pub const ARG_MAX_FAILED_LOGINS: &str = "max-failed-logins";
pub const ARG_LOCKOUT_SECONDS: &str = "lockout-seconds";
pub const ARG_SESSION_SWEEP_SECONDS: &str = "session-sweep-seconds";

/// Parsed auth options, ready to build an `AuthConfig` from.
#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub token_issuer: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub draft_ttl_seconds: u64,
    pub otp_ttl_seconds: u64,
    pub otp_cooldown_seconds: u64,
    pub session_cache_ttl_seconds: u64,
    pub max_failed_logins: i32,
    pub lockout_seconds: i64,
    pub session_sweep_seconds: u64,
}

impl Options {
    /// Extract auth options from parsed matches.
    ///
    /// # Errors
    /// Returns an error when a required secret is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_else(|| "http://localhost:5173".to_string()),
            access_token_secret: matches
                .get_one::<String>(ARG_ACCESS_TOKEN_SECRET)
                .cloned()
                .context("missing required argument: --access-token-secret")?,
            refresh_token_secret: matches
                .get_one::<String>(ARG_REFRESH_TOKEN_SECRET)
                .cloned()
                .context("missing required argument: --refresh-token-secret")?,
            token_issuer: matches
                .get_one::<String>(ARG_TOKEN_ISSUER)
                .cloned()
                .unwrap_or_else(|| "cityconnect".to_string()),
            access_token_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TOKEN_TTL)
                .copied()
                .unwrap_or(900),
            refresh_token_ttl_seconds: matches
                .get_one::<i64>(ARG_REFRESH_TOKEN_TTL)
                .copied()
                .unwrap_or(604_800),
            draft_ttl_seconds: matches.get_one::<u64>(ARG_DRAFT_TTL).copied().unwrap_or(600),
            otp_ttl_seconds: matches.get_one::<u64>(ARG_OTP_TTL).copied().unwrap_or(120),
            otp_cooldown_seconds: matches
                .get_one::<u64>(ARG_OTP_COOLDOWN)
                .copied()
                .unwrap_or(120),
            session_cache_ttl_seconds: matches
                .get_one::<u64>(ARG_SESSION_CACHE_TTL)
                .copied()
                .unwrap_or(604_800),
            max_failed_logins: matches
                .get_one::<i32>(ARG_MAX_FAILED_LOGINS)
                .copied()
                .unwrap_or(5),
            lockout_seconds: matches
                .get_one::<i64>(ARG_LOCKOUT_SECONDS)
                .copied()
                .unwrap_or(7200),
            session_sweep_seconds: matches
                .get_one::<u64>(ARG_SESSION_SWEEP_SECONDS)
                .copied()
                .unwrap_or(300),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Origin the SPA is served from; drives CORS and cookie flags")
                .default_value("http://localhost:5173")
                .env("CITYCONNECT_FRONTEND_BASE_URL"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_SECRET)
                .long(ARG_ACCESS_TOKEN_SECRET)
                .help("HMAC secret for access tokens")
                .env("CITYCONNECT_ACCESS_TOKEN_SECRET")
                .required(true),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_SECRET)
                .long(ARG_REFRESH_TOKEN_SECRET)
                .help("HMAC secret for refresh tokens; keep distinct from the access secret")
                .env("CITYCONNECT_REFRESH_TOKEN_SECRET")
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer claim stamped into both token kinds")
                .default_value("cityconnect")
                .env("CITYCONNECT_TOKEN_ISSUER"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Access token lifetime in seconds")
                .default_value("900")
                .env("CITYCONNECT_ACCESS_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL)
                .long(ARG_REFRESH_TOKEN_TTL)
                .help("Refresh token and session lifetime in seconds")
                .default_value("604800")
                .env("CITYCONNECT_REFRESH_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_DRAFT_TTL)
                .long(ARG_DRAFT_TTL)
                .help("Registration draft lifetime in seconds, refreshed per verification")
                .default_value("600")
                .env("CITYCONNECT_DRAFT_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OTP_TTL)
                .long(ARG_OTP_TTL)
                .help("One-time code lifetime in seconds")
                .default_value("120")
                .env("CITYCONNECT_OTP_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OTP_COOLDOWN)
                .long(ARG_OTP_COOLDOWN)
                .help("Cooldown between code issuances per channel, in seconds")
                .default_value("120")
                .env("CITYCONNECT_OTP_COOLDOWN_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SESSION_CACHE_TTL)
                .long(ARG_SESSION_CACHE_TTL)
                .help("Session cache entry lifetime in seconds")
                .default_value("604800")
                .env("CITYCONNECT_SESSION_CACHE_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAX_FAILED_LOGINS)
                .long(ARG_MAX_FAILED_LOGINS)
                .help("Failed password attempts before the account locks")
                .default_value("5")
                .env("CITYCONNECT_MAX_FAILED_LOGINS")
                .value_parser(clap::value_parser!(i32)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_SECONDS)
                .long(ARG_LOCKOUT_SECONDS)
                .help("Account lock duration after too many failed logins, in seconds")
                .default_value("7200")
                .env("CITYCONNECT_LOCKOUT_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_SESSION_SWEEP_SECONDS)
                .long(ARG_SESSION_SWEEP_SECONDS)
                .help("Interval for sweeping expired session rows, in seconds")
                .default_value("300")
                .env("CITYCONNECT_SESSION_SWEEP_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
}
