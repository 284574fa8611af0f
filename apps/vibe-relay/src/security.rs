use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::RelayError;
use crate::AppState;

const ALLOW_METHODS: &str = "GET,POST,OPTIONS";
const ALLOW_HEADERS: &str = "*, Authorization";

/// Echoes allowed origins and answers every preflight itself, so `OPTIONS`
/// never reaches the key gate or a handler.
pub(crate) async fn cors_mw(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|origin| state.settings().origins.allows(origin))
        .and_then(|origin| HeaderValue::from_str(origin).ok());

    let mut res = if req.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };

    let h = res.headers_mut();
    if let Some(origin) = origin {
        h.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        h.append(header::VARY, HeaderValue::from_static("Origin"));
    }
    h.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    res
}

pub(crate) async fn api_key_mw(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let settings = state.settings();
    let Some(key) = settings.api_key.as_deref() else {
        return next.run(req).await;
    };
    if req.method() == Method::OPTIONS || bearer_matches(req.headers(), key) {
        return next.run(req).await;
    }
    debug!(
        target: "vibe::security",
        method = %req.method(),
        path = %req.uri().path(),
        "missing or wrong api key"
    );
    RelayError::Unauthorized.into_response()
}

fn bearer_matches(headers: &HeaderMap, key: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|presented| ct_eq(presented.as_bytes(), key.as_bytes()))
        .unwrap_or(false)
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub(crate) async fn headers_mw(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    let h = res.headers_mut();
    let mut add_hdr = |name: &'static str, val: &'static str| {
        let name = HeaderName::from_static(name);
        if !h.contains_key(&name) {
            h.insert(name, HeaderValue::from_static(val));
        }
    };
    add_hdr("x-content-type-options", "nosniff");
    add_hdr("referrer-policy", "no-referrer");
    res
}
