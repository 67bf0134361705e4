//! # Warden (login and session control)
//!
//! `warden` sits in front of a user database and decides who gets a session.
//! It checks passwords, issues signed HS256 tokens, refreshes and revokes them,
//! locks accounts after repeated failed logins and throttles clients per
//! address.
//!
//! ## Shared state
//!
//! Nothing is kept in process memory. Failure counters, locks, the revocation
//! list, the identity cache and the rate-limit windows all live in Redis (or
//! Valkey) under `cache:<app>:...` keys with TTLs, so any number of replicas
//! can serve the same users and a restart loses nothing.
//!
//! ## Tokens
//!
//! Tokens carry `orig_iat`, the time of the password login that started the
//! session. Refreshing keeps `orig_iat`, so a session cannot be stretched past
//! the max-refresh window without logging in again. Refresh and logout both
//! revoke the presented token by id until it would have expired anyway.

pub mod cli;
pub mod store;
pub mod warden;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
