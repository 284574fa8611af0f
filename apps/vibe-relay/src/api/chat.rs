use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::error::RelayError;
use crate::upstream::UpstreamReply;
use crate::AppState;

pub(crate) async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UpstreamReply>, RelayError> {
    let Json(request) = payload?;
    state.chat().chat(request).await.map(Json)
}
