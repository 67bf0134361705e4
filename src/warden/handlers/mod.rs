//! HTTP handlers and the helpers they share for reading tokens and client
//! addresses out of requests.

pub mod auth;
pub mod health;
pub mod middleware;
pub mod types;

use axum::http::{
    header::{AUTHORIZATION, COOKIE},
    HeaderMap, Uri,
};
use std::net::SocketAddr;

pub const TOKEN_COOKIE_NAME: &str = "jwt";
pub const TOKEN_QUERY_NAME: &str = "token";

/// Find the presented token: `Authorization: Bearer`, then `?token=`, then the `jwt` cookie.
pub fn extract_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    extract_bearer_token(headers)
        .or_else(|| extract_query_token(uri))
        .or_else(|| extract_cookie_token(headers))
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn extract_query_token(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == TOKEN_QUERY_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn extract_cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Rate-limit key for a request.
///
/// Proxy headers are only honoured when the deployment says a trusted proxy
/// sets them; otherwise the peer address is used.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(ip) = extract_forwarded_ip(headers) {
            return ip;
        }
    }
    peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

fn extract_forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
