use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::RelayError;
use crate::workspace::PatchEntry;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct PatchRequest {
    #[serde(default)]
    patches: Vec<PatchEntry>,
}

pub(crate) async fn preview(
    State(state): State<AppState>,
    payload: Result<Json<PatchRequest>, JsonRejection>,
) -> Result<Json<Value>, RelayError> {
    let Json(req) = payload?;
    let results = state.sandbox().preview(&req.patches).await?;
    Ok(Json(json!({"ok": true, "results": results})))
}

pub(crate) async fn apply(
    State(state): State<AppState>,
    payload: Result<Json<PatchRequest>, JsonRejection>,
) -> Result<Json<Value>, RelayError> {
    let Json(req) = payload?;
    let applied = state.sandbox().apply(&req.patches).await?;
    Ok(Json(json!({"ok": true, "applied": applied})))
}
