use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{read_success, unavailable, UpstreamReply};
use crate::error::RelayError;

const UPSTREAM: &str = "whisper";
/// Multipart field the transcription servers read the upload from.
const UPLOAD_FIELD: &str = "file";
const UPLOAD_FILENAME: &str = "audio.webm";
const DEFAULT_MIME: &str = "application/octet-stream";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transcript field names used by the backends we talk to (whisper.cpp
/// server, faster-whisper wrappers, older demo servers), in priority order.
pub(crate) const TRANSCRIPT_FIELDS: &[&str] = &["text", "result", "transcript"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reachability {
    /// Something answered; the status code is reported but not judged.
    Reachable(u16),
    Unreachable(String),
    NotConfigured,
}

#[derive(Clone)]
pub(crate) struct AsrBridge {
    client: reqwest::Client,
    url: Option<String>,
    token: Option<String>,
}

impl AsrBridge {
    pub(crate) fn new(
        client: reqwest::Client,
        url: Option<String>,
        token: Option<String>,
    ) -> Self {
        Self { client, url, token }
    }

    pub(crate) async fn transcribe(
        &self,
        audio: Bytes,
        mime_hint: Option<&str>,
    ) -> Result<UpstreamReply, RelayError> {
        let url = self
            .url
            .as_deref()
            .ok_or(RelayError::MissingUpstream(UPSTREAM))?;
        if audio.is_empty() {
            return Err(RelayError::NoFile);
        }

        let bytes = audio.len();
        let upload = |mime: &str| {
            multipart::Part::stream_with_length(audio.clone(), bytes as u64)
                .file_name(UPLOAD_FILENAME)
                .mime_str(mime)
        };
        let mime = mime_hint
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MIME);
        let part = match upload(mime) {
            Ok(part) => part,
            Err(_) => {
                debug!(target: "vibe::asr", mime, "ignoring unparsable content type");
                upload(DEFAULT_MIME).map_err(|err| RelayError::Internal(err.to_string()))?
            }
        };
        self.send(url, part, bytes).await
    }

    async fn send(
        &self,
        url: &str,
        part: multipart::Part,
        bytes: usize,
    ) -> Result<UpstreamReply, RelayError> {
        let form = multipart::Form::new().part(UPLOAD_FIELD, part);
        let mut req = self.client.post(url).multipart(form);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        debug!(target: "vibe::asr", bytes, url, "forwarding audio");
        let resp = req.send().await.map_err(|err| unavailable(UPSTREAM, err))?;
        let body = read_success(UPSTREAM, resp).await?;
        let reply = normalize_transcript(body);
        info!(target: "vibe::asr", bytes, chars = reply.text.len(), "transcription complete");
        Ok(reply)
    }

    /// GET the endpoint, falling back to OPTIONS. Any HTTP answer proves the
    /// server is up, so only transport failures count as unreachable.
    pub(crate) async fn health(&self) -> Reachability {
        let Some(url) = self.url.as_deref() else {
            return Reachability::NotConfigured;
        };
        match self.client.get(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) => return Reachability::Reachable(resp.status().as_u16()),
            Err(err) => {
                debug!(target: "vibe::asr", error = %err, "GET probe failed; trying OPTIONS")
            }
        }
        match self
            .client
            .request(reqwest::Method::OPTIONS, url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => Reachability::Reachable(resp.status().as_u16()),
            Err(err) => Reachability::Unreachable(err.to_string()),
        }
    }
}

/// JSON bodies are searched for [`TRANSCRIPT_FIELDS`]; anything that does not
/// parse as JSON is taken verbatim as the transcript.
pub(crate) fn normalize_transcript(body: String) -> UpstreamReply {
    match serde_json::from_str::<Value>(&body) {
        Ok(raw) => UpstreamReply {
            text: pick_transcript(&raw),
            raw,
        },
        Err(_) => UpstreamReply {
            raw: json!({ "text": body }),
            text: body,
        },
    }
}

fn pick_transcript(raw: &Value) -> String {
    TRANSCRIPT_FIELDS
        .iter()
        .find_map(|field| match raw.get(field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}
