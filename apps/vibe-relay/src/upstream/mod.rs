//! Adapters for the local speech and chat backends.

pub(crate) mod asr;
pub(crate) mod chat;

use serde::Serialize;
use serde_json::Value;

use crate::error::RelayError;

/// Normalized reply from either backend. `text` is always present and empty
/// when the upstream body carried none of the known fields.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct UpstreamReply {
    pub text: String,
    pub raw: Value,
}

/// Reads the body of an upstream response and turns non-2xx statuses into
/// [`RelayError::UpstreamError`] carrying the body text as diagnostic detail.
async fn read_success(
    upstream: &'static str,
    resp: reqwest::Response,
) -> Result<String, RelayError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|err| RelayError::UpstreamUnavailable {
            upstream,
            detail: err.to_string(),
        })?;
    if !status.is_success() {
        return Err(RelayError::UpstreamError {
            upstream,
            status: status.as_u16(),
            detail: body,
        });
    }
    Ok(body)
}

fn unavailable(upstream: &'static str, err: reqwest::Error) -> RelayError {
    RelayError::UpstreamUnavailable {
        upstream,
        detail: err.to_string(),
    }
}
