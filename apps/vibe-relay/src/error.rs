use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Every failure a handler can surface. Converted to a problem-style JSON
/// body at the handler boundary; nothing here ever aborts the process.
#[derive(Debug, thiserror::Error)]
pub(crate) enum RelayError {
    #[error("{0} upstream is not configured")]
    MissingUpstream(&'static str),
    #[error("no file")]
    NoFile,
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("path escapes the workspace: {0}")]
    PathEscape(String),
    #[error("{upstream} upstream unreachable")]
    UpstreamUnavailable {
        upstream: &'static str,
        detail: String,
    },
    #[error("{upstream} upstream")]
    UpstreamError {
        upstream: &'static str,
        status: u16,
        detail: String,
    },
    #[error("failed to write {file}")]
    WriteFailed { file: String, detail: String },
    #[error("{0}")]
    Internal(String),
}

impl RelayError {
    pub(crate) fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingUpstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::NoFile => StatusCode::BAD_REQUEST,
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::PathEscape(_) => StatusCode::BAD_REQUEST,
            RelayError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            RelayError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            RelayError::WriteFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            RelayError::MissingUpstream(_) => "Config Missing",
            RelayError::NoFile | RelayError::BadRequest(_) => "Bad Request",
            RelayError::Unauthorized => "Unauthorized",
            RelayError::PathEscape(_) => "Path Escape",
            RelayError::UpstreamUnavailable { .. } => "Upstream Unavailable",
            RelayError::UpstreamError { .. } => "Upstream Error",
            RelayError::WriteFailed { .. } => "Write Failed",
            RelayError::Internal(_) => "Internal Error",
        }
    }

    fn detail(&self) -> Option<Value> {
        match self {
            RelayError::UpstreamUnavailable { detail, .. } => Some(json!(detail)),
            RelayError::UpstreamError { status, detail, .. } => {
                Some(json!({ "status": status, "body": detail }))
            }
            RelayError::WriteFailed { file, detail } => {
                Some(json!({ "file": file, "error": detail }))
            }
            _ => None,
        }
    }
}

pub(crate) fn problem(status: StatusCode, title: &str, error: &str, detail: Option<Value>) -> Response {
    let mut body = json!({
        "type": "about:blank",
        "title": title,
        "status": status.as_u16(),
        "error": error,
    });
    if let Some(detail) = detail {
        body["detail"] = detail;
    }
    (status, Json(body)).into_response()
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            warn!(target: "vibe::http", status = status.as_u16(), error = %message, detail = ?self.detail(), "request failed");
        } else {
            debug!(target: "vibe::http", status = status.as_u16(), error = %message, "request rejected");
        }
        problem(status, self.title(), &message, self.detail())
    }
}

impl From<JsonRejection> for RelayError {
    fn from(rejection: JsonRejection) -> Self {
        RelayError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for RelayError {
    fn from(err: MultipartError) -> Self {
        RelayError::BadRequest(err.body_text())
    }
}
