use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

/// Every way a login or session request can be refused.
///
/// Each variant maps to a fixed status and a stable `error` code, so clients
/// can branch on the code without parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("incorrect username or password")]
    BadCredentials,
    #[error("account is temporarily locked")]
    AccountLocked,
    #[error("account is disabled")]
    AccountDisabled,
    #[error("{0}")]
    Validation(String),
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("token is expired")]
    TokenExpired,
    #[error("token has been revoked")]
    Revoked,
    #[error("token could not be verified")]
    Unverifiable,
    #[error("token is too old to refresh")]
    RefreshExpired,
    #[error("identity could not be resolved")]
    IdentityUnavailable,
    #[error("too many requests")]
    RateLimited,
    #[error("session service unavailable")]
    Unavailable,
    #[error("failed to sign token")]
    Signing,
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadCredentials
            | Self::MissingToken
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::Revoked
            | Self::Unverifiable
            | Self::RefreshExpired
            | Self::IdentityUnavailable => StatusCode::UNAUTHORIZED,
            Self::AccountLocked => StatusCode::LOCKED,
            Self::AccountDisabled => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Signing => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadCredentials => "bad_credentials",
            Self::AccountLocked => "account_locked",
            Self::AccountDisabled => "account_disabled",
            Self::Validation(_) => "validation_error",
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
            Self::TokenExpired => "token_expired",
            Self::Revoked => "token_revoked",
            Self::Unverifiable => "token_unverifiable",
            Self::RefreshExpired => "refresh_expired",
            Self::IdentityUnavailable => "identity_unavailable",
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::Signing => "internal_error",
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: u16,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {self}");
        }
        let body = ErrorResponse {
            code: status.as_u16(),
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
