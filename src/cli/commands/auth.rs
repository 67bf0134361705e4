use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

use crate::warden::state::AuthConfig;

pub const ARG_APP_NAME: &str = "app-name";
pub const ARG_SIGNING_KEY: &str = "signing-key";
pub const ARG_TOKEN_TIMEOUT_SECONDS: &str = "token-timeout-seconds";
pub const ARG_MAX_REFRESH_SECONDS: &str = "max-refresh-seconds";
pub const ARG_CACHE_TTL_SECONDS: &str = "cache-ttl-seconds";
pub const ARG_MAX_LOGIN_ATTEMPTS: &str = "max-login-attempts";
pub const ARG_LOCK_DURATION_SECONDS: &str = "lock-duration-seconds";
pub const ARG_RATE_LIMIT: &str = "rate-limit";
pub const ARG_RATE_WINDOW_SECONDS: &str = "rate-window-seconds";
pub const ARG_TRUST_FORWARDED_FOR: &str = "trust-forwarded-for";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_lockout_args(command);
    with_rate_limit_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_APP_NAME)
                .long(ARG_APP_NAME)
                .help("Token issuer and session store key namespace")
                .env("WARDEN_APP_NAME")
                .default_value("warden"),
        )
        .arg(
            Arg::new(ARG_SIGNING_KEY)
                .long(ARG_SIGNING_KEY)
                .help("HMAC key used to sign tokens (at least 32 bytes)")
                .env("WARDEN_SIGNING_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_TIMEOUT_SECONDS)
                .long(ARG_TOKEN_TIMEOUT_SECONDS)
                .help("Token lifetime in seconds")
                .env("WARDEN_TOKEN_TIMEOUT_SECONDS")
                .default_value("28800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAX_REFRESH_SECONDS)
                .long(ARG_MAX_REFRESH_SECONDS)
                .help("How long after the original login a token may still be refreshed")
                .env("WARDEN_MAX_REFRESH_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_CACHE_TTL_SECONDS)
                .long(ARG_CACHE_TTL_SECONDS)
                .help("Identity cache TTL in seconds")
                .env("WARDEN_CACHE_TTL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAX_LOGIN_ATTEMPTS)
                .long(ARG_MAX_LOGIN_ATTEMPTS)
                .help("Failed logins before an account is locked")
                .env("WARDEN_MAX_LOGIN_ATTEMPTS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_LOCK_DURATION_SECONDS)
                .long(ARG_LOCK_DURATION_SECONDS)
                .help("How long a locked account stays locked, in seconds")
                .env("WARDEN_LOCK_DURATION_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_rate_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT)
                .long(ARG_RATE_LIMIT)
                .help("Requests allowed per client per window, 0 disables rate limiting")
                .env("WARDEN_RATE_LIMIT")
                .default_value("2")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_RATE_WINDOW_SECONDS)
                .long(ARG_RATE_WINDOW_SECONDS)
                .help("Rate limit window in seconds")
                .env("WARDEN_RATE_WINDOW_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_TRUST_FORWARDED_FOR)
                .long(ARG_TRUST_FORWARDED_FOR)
                .help("Key rate limits on X-Forwarded-For / X-Real-IP (only behind a trusted proxy)")
                .env("WARDEN_TRUST_FORWARDED_FOR")
                .action(ArgAction::SetTrue),
        )
}

fn seconds(matches: &ArgMatches, id: &str) -> Result<Duration> {
    matches
        .get_one::<u64>(id)
        .copied()
        .map(Duration::from_secs)
        .with_context(|| format!("missing required argument: --{id}"))
}

/// Build the session configuration from matches.
///
/// # Errors
/// Returns an error if an argument is missing or the resulting configuration is invalid.
pub fn parse(matches: &ArgMatches) -> Result<AuthConfig> {
    let signing_key = matches
        .get_one::<String>(ARG_SIGNING_KEY)
        .cloned()
        .filter(|value| !value.is_empty())
        .context("missing required argument: --signing-key")?;
    let app_name = matches
        .get_one::<String>(ARG_APP_NAME)
        .cloned()
        .unwrap_or_else(|| "warden".to_string());
    let max_login_attempts = matches
        .get_one::<u32>(ARG_MAX_LOGIN_ATTEMPTS)
        .copied()
        .context("missing required argument: --max-login-attempts")?;
    let rate_limit = matches
        .get_one::<u64>(ARG_RATE_LIMIT)
        .copied()
        .context("missing required argument: --rate-limit")?;

    let config = AuthConfig::new(SecretString::from(signing_key))
        .with_app_name(app_name)
        .with_token_timeout(seconds(matches, ARG_TOKEN_TIMEOUT_SECONDS)?)
        .with_max_refresh(seconds(matches, ARG_MAX_REFRESH_SECONDS)?)
        .with_cache_ttl(seconds(matches, ARG_CACHE_TTL_SECONDS)?)
        .with_max_login_attempts(max_login_attempts)
        .with_lock_duration(seconds(matches, ARG_LOCK_DURATION_SECONDS)?)
        .with_rate_limit(rate_limit, seconds(matches, ARG_RATE_WINDOW_SECONDS)?)
        .with_trust_forwarded_for(matches.get_flag(ARG_TRUST_FORWARDED_FOR));

    config.validate()?;

    Ok(config)
}
