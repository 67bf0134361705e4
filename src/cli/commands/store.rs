use anyhow::{bail, Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

use crate::warden::StoreSettings;

pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_STORE_POOL_SIZE: &str = "store-pool-size";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Session store URL, example: redis://127.0.0.1:6379/0")
                .env("WARDEN_REDIS_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_STORE_POOL_SIZE)
                .long(ARG_STORE_POOL_SIZE)
                .help("Number of session store connections")
                .env("WARDEN_STORE_POOL_SIZE")
                .default_value("8")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Deadline for a single session store operation in milliseconds")
                .env("WARDEN_STORE_TIMEOUT_MS")
                .default_value("500")
                .value_parser(clap::value_parser!(u64)),
        )
}

/// Parse session store arguments from matches.
///
/// # Errors
/// Returns an error if the store URL is missing or a setting is zero.
pub fn parse(matches: &ArgMatches) -> Result<StoreSettings> {
    let url = matches
        .get_one::<String>(ARG_REDIS_URL)
        .cloned()
        .filter(|value| !value.trim().is_empty())
        .context("missing required argument: --redis-url")?;
    let pool_size = matches
        .get_one::<usize>(ARG_STORE_POOL_SIZE)
        .copied()
        .unwrap_or(8);
    let timeout_ms = matches
        .get_one::<u64>(ARG_STORE_TIMEOUT_MS)
        .copied()
        .unwrap_or(500);

    if pool_size == 0 {
        bail!("--{ARG_STORE_POOL_SIZE} must be positive");
    }
    if timeout_ms == 0 {
        bail!("--{ARG_STORE_TIMEOUT_MS} must be positive");
    }

    Ok(StoreSettings {
        url: SecretString::from(url),
        pool_size,
        op_timeout: Duration::from_millis(timeout_ms),
    })
}
