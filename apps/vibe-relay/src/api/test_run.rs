use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::error::RelayError;
use crate::test_runner::TestRunResult;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
struct TestRunRequest {
    #[serde(default)]
    cmd: Option<String>,
}

/// The body is optional: an empty request runs the configured default.
/// A failing test suite is still a 200; `ok` and `code` carry the verdict.
pub(crate) async fn run(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TestRunResult>, RelayError> {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        TestRunRequest::default()
    } else {
        serde_json::from_slice::<TestRunRequest>(&body)
            .map_err(|err| RelayError::BadRequest(format!("invalid test request: {err}")))?
    };
    state.tests().run(req.cmd.as_deref()).await.map(Json)
}
