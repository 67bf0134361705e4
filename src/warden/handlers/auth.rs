use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    http::{header::CACHE_CONTROL, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::types::{LoginRequest, LoginResponse, LogoutResponse, RefreshResponse, UserInfoResponse};
use crate::warden::{
    claims::IssuedToken,
    error::{AuthError, ErrorResponse},
    lifecycle::Session,
    state::AppState,
};

fn no_store() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers
}

fn expire(issued: &IssuedToken) -> String {
    issued.expires_at.to_rfc3339()
}

#[utoipa::path(
    post,
    path= "/api/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Credentials accepted, token issued", body = LoginResponse),
        (status = 400, description = "Malformed credentials", body = ErrorResponse),
        (status = 401, description = "Incorrect username or password", body = ErrorResponse),
        (status = 403, description = "Account disabled", body = ErrorResponse),
        (status = 423, description = "Account temporarily locked", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag= "session"
)]
#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(StatusCode, HeaderMap, Json<LoginResponse>), AuthError> {
    let Json(request) = payload.map_err(|rejection| {
        debug!("Rejected login payload: {rejection}");
        AuthError::Validation("expected a JSON body with username and password".to_string())
    })?;

    let issued = state
        .lifecycle()
        .authenticate(&request.username, &request.password)
        .await?;

    Ok((
        StatusCode::OK,
        no_store(),
        Json(LoginResponse {
            code: StatusCode::OK.as_u16(),
            expire: expire(&issued),
            token: issued.token,
            message: "login successful".to_string(),
        }),
    ))
}

#[utoipa::path(
    post,
    path= "/api/refresh",
    responses (
        (status = 200, description = "New token issued, presented token revoked", body = RefreshResponse),
        (status = 401, description = "Token missing, invalid, revoked or too old to refresh", body = ErrorResponse),
        (status = 503, description = "Presented token could not be revoked", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag= "session"
)]
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<(StatusCode, HeaderMap, Json<RefreshResponse>), AuthError> {
    let issued = state.lifecycle().rotate(&session).await?;

    Ok((
        StatusCode::OK,
        no_store(),
        Json(RefreshResponse {
            code: StatusCode::OK.as_u16(),
            expire: expire(&issued),
            token: issued.token,
        }),
    ))
}

#[utoipa::path(
    post,
    path= "/api/logout",
    responses (
        (status = 200, description = "Token revoked", body = LogoutResponse),
        (status = 401, description = "Token missing, invalid or already revoked", body = ErrorResponse),
        (status = 503, description = "Token could not be revoked", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag= "session"
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<LogoutResponse>, AuthError> {
    state.lifecycle().revoke_session(&session).await?;

    Ok(Json(LogoutResponse {
        message: "logout successful".to_string(),
    }))
}

#[utoipa::path(
    get,
    path= "/api/userinfo",
    responses (
        (status = 200, description = "Identity behind the presented token", body = UserInfoResponse),
        (status = 401, description = "Token missing, invalid or revoked", body = ErrorResponse),
        (status = 403, description = "Account disabled", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag= "session"
)]
pub async fn userinfo(Extension(session): Extension<Session>) -> Json<UserInfoResponse> {
    let Session { claims, identity } = session;
    Json(UserInfoResponse {
        id: identity.id,
        username: identity.username,
        email: identity.email,
        status: identity.status.as_str().to_string(),
        token_id: claims.jti,
        issued_at: claims.iat,
        expires_at: claims.exp,
        login_at: claims.orig_iat,
    })
}
