use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;

use crate::AppState;

/// One `http.access` event per request when `VIBE_ACCESS_LOG` is on. The
/// route template is logged instead of the raw URI when one matched.
pub(crate) async fn access_log_mw(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.settings().access_log {
        return next.run(req).await;
    }
    let started = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip().to_string())
        .unwrap_or_default();
    let res = next.run(req).await;
    info!(
        target: vibe_otel::ACCESS_TARGET,
        method = method.as_str(),
        path = %path,
        status = res.status().as_u16(),
        dur_ms = started.elapsed().as_millis() as u64,
        remote = %remote,
        "request"
    );
    res
}
