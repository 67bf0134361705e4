//! Access token claims, signing and verification (HS256).
//!
//! `jsonwebtoken` checks the signature, the issuer and that the registered
//! claims are present; expiry and not-before are then checked here against a
//! [`Clock`], so the same rules apply in tests running on a paused clock.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::error::AuthError;

pub const ACCESS_PURPOSE: &str = "access";

/// Source of "now" in Unix seconds.
#[derive(Clone, Copy, Debug)]
pub enum Clock {
    System,
    /// Wall time captured once, advanced by the tokio clock afterwards.
    Anchored { unix: i64, at: Instant },
}

impl Clock {
    #[must_use]
    pub fn anchored() -> Self {
        Self::Anchored {
            unix: Utc::now().timestamp(),
            at: Instant::now(),
        }
    }

    #[must_use]
    pub fn now(&self) -> i64 {
        match self {
            Self::System => Utc::now().timestamp(),
            Self::Anchored { unix, at } => {
                let elapsed = i64::try_from(at.elapsed().as_secs()).unwrap_or(i64::MAX);
                unix.saturating_add(elapsed)
            }
        }
    }
}

/// Claims carried by every access token. All fields are required.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub iss: String,
    pub purpose: String,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    /// Time of the original login, unchanged across refreshes.
    pub orig_iat: i64,
    pub jti: String,
}

impl TokenClaims {
    /// Identity id from `sub`; zero or non-numeric subjects are rejected.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidToken`] when `sub` is not a positive id.
    pub fn identity_id(&self) -> Result<i64, AuthError> {
        self.sub
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(AuthError::InvalidToken)
    }

    /// Seconds of validity left at `now`, zero once expired.
    #[must_use]
    pub fn remaining(&self, now: i64) -> Duration {
        Duration::from_secs(u64::try_from(self.exp.saturating_sub(now)).unwrap_or(0))
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub claims: TokenClaims,
}

#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    timeout: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("issuer", &self.issuer)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    #[must_use]
    pub fn new(signing_key: &SecretString, issuer: &str, timeout: Duration) -> Self {
        let secret = signing_key.expose_secret().as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        validation.set_issuer(&[issuer]);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            issuer: issuer.to_string(),
            timeout,
        }
    }

    /// Sign a fresh token for `identity_id` with a new `jti`.
    ///
    /// `orig_iat` is `None` on login and the previous token's value on refresh.
    ///
    /// # Errors
    /// Returns [`AuthError::Signing`] if encoding fails.
    pub fn issue(
        &self,
        identity_id: i64,
        orig_iat: Option<i64>,
        now: i64,
    ) -> Result<IssuedToken, AuthError> {
        let timeout = i64::try_from(self.timeout.as_secs()).unwrap_or(i64::MAX);
        let claims = TokenClaims {
            sub: identity_id.to_string(),
            iss: self.issuer.clone(),
            purpose: ACCESS_PURPOSE.to_string(),
            exp: now.saturating_add(timeout),
            nbf: now,
            iat: now,
            orig_iat: orig_iat.unwrap_or(now),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| AuthError::Signing)?;

        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
            claims,
        })
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    /// Returns [`AuthError::TokenExpired`] once `exp` has passed and
    /// [`AuthError::InvalidToken`] for anything else that does not check out.
    pub fn verify(&self, token: &str, now: i64) -> Result<TokenClaims, AuthError> {
        let data = decode::<TokenClaims>(token, &self.decoding, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            },
        )?;
        let claims = data.claims;

        if claims.purpose != ACCESS_PURPOSE || Uuid::parse_str(&claims.jti).is_err() {
            return Err(AuthError::InvalidToken);
        }
        claims.identity_id()?;

        if claims.nbf > now || claims.iat > now || claims.orig_iat > claims.iat {
            return Err(AuthError::InvalidToken);
        }
        if claims.exp <= now {
            return Err(AuthError::TokenExpired);
        }

        Ok(claims)
    }
}
