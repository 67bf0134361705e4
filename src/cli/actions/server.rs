use crate::warden::{self, state::AuthConfig, StoreSettings};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub store: StoreSettings,
    pub auth: AuthConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database or session store cannot be reached, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let result = warden::new(args.port, args.dsn, args.store, args.auth).await;

    crate::cli::telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_url(args.dsn.expose_secret())),
        ("store", redact_url(args.store.url.expose_secret())),
        ("store_pool_size", args.store.pool_size.to_string()),
        (
            "store_timeout_ms",
            args.store.op_timeout.as_millis().to_string(),
        ),
        ("app_name", args.auth.app_name().to_string()),
        (
            "token_timeout_s",
            args.auth.token_timeout().as_secs().to_string(),
        ),
        (
            "max_refresh_s",
            args.auth.max_refresh().as_secs().to_string(),
        ),
        ("cache_ttl_s", args.auth.cache_ttl().as_secs().to_string()),
        (
            "max_login_attempts",
            args.auth.max_login_attempts().to_string(),
        ),
        (
            "lock_duration_s",
            args.auth.lock_duration().as_secs().to_string(),
        ),
        (
            "rate_limit",
            format!(
                "{}/{}s",
                args.auth.rate_limit(),
                args.auth.rate_window().as_secs()
            ),
        ),
        (
            "trust_forwarded_for",
            args.auth.trust_forwarded_for().to_string(),
        ),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-url".to_string(),
    }
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}
