use crate::{api, cli::commands::auth::Options as AuthOptions};
use anyhow::Result;
use secrecy::SecretString;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub redis_url: String,
    pub auth: AuthOptions,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the stores are unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = api::handlers::auth::AuthConfig::new(
        args.auth.frontend_base_url,
        SecretString::from(args.auth.access_token_secret),
        SecretString::from(args.auth.refresh_token_secret),
    )
    .with_token_issuer(args.auth.token_issuer)
    .with_access_token_ttl_seconds(args.auth.access_token_ttl_seconds)
    .with_refresh_token_ttl_seconds(args.auth.refresh_token_ttl_seconds)
    .with_draft_ttl_seconds(args.auth.draft_ttl_seconds)
    .with_otp_ttl_seconds(args.auth.otp_ttl_seconds)
    .with_otp_cooldown_seconds(args.auth.otp_cooldown_seconds)
    .with_session_cache_ttl_seconds(args.auth.session_cache_ttl_seconds)
    .with_max_failed_logins(args.auth.max_failed_logins)
    .with_lockout_seconds(args.auth.lockout_seconds);

    debug!("Auth config: {:?}", auth_config);

    api::new(
        args.port,
        args.dsn,
        args.redis_url,
        auth_config,
        Duration::from_secs(args.auth.session_sweep_seconds),
    )
    .await
}
