//! Login and session control: credential checks, signed tokens with
//! revocation, per-account lockout, a cached identity view and per-client
//! rate limiting, all backed by a shared keyed store.

pub mod cache;
pub mod claims;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod lifecycle;
pub mod lockout;
pub mod password;
pub mod rate_limit;
pub mod revocation;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;

use anyhow::{Context, Result};
use argon2::Params;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

use crate::store::RedisStore;
use handlers::{auth, health, middleware};
use state::{AppState, AuthConfig};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::userinfo,
    ),
    components(schemas(
        health::Health,
        handlers::types::LoginRequest,
        handlers::types::LoginResponse,
        handlers::types::RefreshResponse,
        handlers::types::LogoutResponse,
        handlers::types::UserInfoResponse,
        error::ErrorResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "session", description = "Login, token refresh and logout"),
        (name = "health", description = "Service and session store status"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Session routes.
///
/// Every `/api` route except `/api/health` goes through the rate limiter;
/// refresh, logout and userinfo also require a valid token.
pub fn router(state: Arc<AppState>) -> Router {
    let session = Router::new()
        .route("/api/refresh", post(auth::refresh))
        .route("/api/logout", post(auth::logout))
        .route("/api/userinfo", get(auth::userinfo))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_session));

    let limited = Router::new()
        .route("/api/login", post(auth::login))
        .merge(session)
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit));

    Router::new()
        .merge(limited)
        .route("/api/health", get(health::health))
        .route("/api-docs/openapi.json", get(openapi_json))
        .with_state(state)
}

/// Connection settings for the shared session store.
#[derive(Clone, Debug)]
pub struct StoreSettings {
    pub url: SecretString,
    pub pool_size: usize,
    pub op_timeout: Duration,
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: SecretString,
    store: StoreSettings,
    config: AuthConfig,
) -> Result<()> {
    config.validate().context("Invalid session configuration")?;

    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let redis = RedisStore::connect(store.url.expose_secret(), store.pool_size, store.op_timeout)
        .await
        .context("Failed to connect to session store")?;

    let passwords = password::PasswordChecker::new(Params::default())
        .context("Failed to prepare password checker")?;

    let state = Arc::new(AppState::new(
        config,
        Arc::new(redis),
        Arc::new(identity::PgIdentityLookup::new(pool)),
        passwords,
        claims::Clock::System,
    ));

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_documents_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/health",
            "/api/login",
            "/api/refresh",
            "/api/logout",
            "/api/userinfo",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let has_bearer = doc
            .components
            .as_ref()
            .is_some_and(|components| components.security_schemes.contains_key("bearer"));
        assert!(has_bearer);
    }
}
