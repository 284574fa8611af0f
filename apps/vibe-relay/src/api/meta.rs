use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::AppState;

/// Liveness probe; never touches an upstream.
pub(crate) async fn health() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

pub(crate) async fn about(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.settings();
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "mode": settings.mode.as_str(),
        "auth": settings.api_key.is_some(),
        "upstreams": {
            "whisper": settings.whisper_url.is_some(),
            "chat": state.chat().dialect().map(|d| d.as_str()),
        },
        "test_cmd": state.tests().default_cmd(),
        "endpoints": state.endpoints().as_slice(),
    }))
}
