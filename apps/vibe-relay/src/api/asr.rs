use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::RelayError;
use crate::upstream::asr::Reachability;
use crate::upstream::UpstreamReply;
use crate::AppState;

/// Multipart field the browser recorder uploads into.
const AUDIO_FIELD: &str = "audio";

pub(crate) async fn transcribe(
    State(state): State<AppState>,
    form: Result<Multipart, MultipartRejection>,
) -> Result<Json<UpstreamReply>, RelayError> {
    // A request that is not multipart at all carries no file either.
    let Ok(mut form) = form else {
        return Err(RelayError::NoFile);
    };
    while let Some(field) = form.next_field().await? {
        if field.name() != Some(AUDIO_FIELD) {
            continue;
        }
        let mime = field.content_type().map(str::to_string);
        let audio = field.bytes().await?;
        return state
            .asr()
            .transcribe(audio, mime.as_deref())
            .await
            .map(Json);
    }
    Err(RelayError::NoFile)
}

pub(crate) async fn asr_health(State(state): State<AppState>) -> Response {
    match state.asr().health().await {
        Reachability::Reachable(status) => {
            Json(json!({"ok": true, "status": status})).into_response()
        }
        Reachability::Unreachable(error) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"ok": false, "error": error})),
        )
            .into_response(),
        Reachability::NotConfigured => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"ok": false, "error": RelayError::MissingUpstream("whisper").to_string()})),
        )
            .into_response(),
    }
}
