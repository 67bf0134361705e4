//! Request guards layered with `axum::middleware::from_fn_with_state`.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::debug;

use super::{client_key, extract_token};
use crate::warden::{error::AuthError, rate_limit::RateLimitDecision, state::AppState};

/// Admit the request against the client's sliding window, or answer 429.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(
        request.headers(),
        peer,
        state.config().trust_forwarded_for(),
    );

    match state.rate_limiter().admit(&client).await {
        RateLimitDecision::Allowed => next.run(request).await,
        RateLimitDecision::Limited => {
            debug!("Rate limited client {client}");
            AuthError::RateLimited.into_response()
        }
    }
}

/// Validate the presented token and attach the resulting
/// [`Session`](crate::warden::lifecycle::Session) to the request extensions.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_token(request.headers(), request.uri()) else {
        return AuthError::MissingToken.into_response();
    };

    match state.lifecycle().validate(&token).await {
        Ok(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}
