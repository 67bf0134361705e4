use crate::{warden::state::AppState, GIT_COMMIT_HASH};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    store: String,
}

#[utoipa::path(
    get,
    path= "/api/health",
    responses (
        (status = 200, description = "Session store is reachable", body = [Health]),
        (status = 503, description = "Session store is unreachable", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let result = state.store().ping().await.map_err(|err| {
        error!("Failed to ping session store: {err}");
    });

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: if result.is_ok() {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .unwrap_or_else(|err| {
            error!("Failed to parse X-App header: {err}");
            HeaderMap::new()
        });

    if result.is_ok() {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::warden::{
        claims::Clock,
        password::PasswordChecker,
        state::AuthConfig,
        testutil::{cheap_params, FlakyStore, StaticLookup},
    };
    use secrecy::SecretString;

    fn state(store: FlakyStore) -> Arc<AppState> {
        let config = AuthConfig::new(SecretString::from("k".repeat(32)));
        Arc::new(AppState::new(
            config,
            Arc::new(store),
            Arc::new(StaticLookup::default()),
            PasswordChecker::new(cheap_params()).unwrap(),
            Clock::anchored(),
        ))
    }

    #[tokio::test]
    async fn healthy_store_reports_ok() {
        let response = health(Method::GET, State(state(FlakyStore::new(MemoryStore::new()))))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        let app = response
            .headers()
            .get("X-App")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(app.starts_with(env!("CARGO_PKG_NAME")));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: Health = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.store, "ok");
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() {
        let store = FlakyStore::new(MemoryStore::new());
        store.fail_reads(true);
        let response = health(Method::HEAD, State(state(store)))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }
}
