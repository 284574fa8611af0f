use serde_json::{json, Value};
use tracing::{debug, info};

use super::{read_success, unavailable, UpstreamReply};
use crate::config::{ChatDialect, ChatUpstream};
use crate::error::RelayError;

const UPSTREAM: &str = "chat";

#[derive(Clone)]
pub(crate) struct ChatBridge {
    client: reqwest::Client,
    upstream: Option<ChatUpstream>,
    token: Option<String>,
}

impl ChatBridge {
    pub(crate) fn new(
        client: reqwest::Client,
        upstream: Option<ChatUpstream>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            upstream,
            token,
        }
    }

    pub(crate) fn dialect(&self) -> Option<ChatDialect> {
        self.upstream.as_ref().map(|u| u.dialect)
    }

    pub(crate) async fn chat(&self, request: Value) -> Result<UpstreamReply, RelayError> {
        let upstream = self
            .upstream
            .as_ref()
            .ok_or(RelayError::MissingUpstream(UPSTREAM))?;
        if !request.is_object() {
            return Err(RelayError::BadRequest(
                "chat body must be a JSON object".into(),
            ));
        }

        let body = outbound_body(upstream.dialect, request);
        let mut req = self.client.post(&upstream.url).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        debug!(
            target: "vibe::chat",
            dialect = upstream.dialect.as_str(),
            url = %upstream.url,
            "forwarding chat turn"
        );
        let resp = req.send().await.map_err(|err| unavailable(UPSTREAM, err))?;
        let text = read_success(UPSTREAM, resp).await?;
        let reply = match serde_json::from_str::<Value>(&text) {
            Ok(raw) => UpstreamReply {
                text: reply_text(upstream.dialect, &raw),
                raw,
            },
            Err(_) => UpstreamReply {
                text: String::new(),
                raw: json!({ "text": text }),
            },
        };
        info!(
            target: "vibe::chat",
            dialect = upstream.dialect.as_str(),
            chars = reply.text.len(),
            "chat reply received"
        );
        Ok(reply)
    }
}

/// Ollama only understands its own envelope; OpenAI-style servers get the
/// client's body untouched.
fn outbound_body(dialect: ChatDialect, request: Value) -> Value {
    match dialect {
        ChatDialect::OpenAi => request,
        ChatDialect::Ollama => {
            let model = request.get("model").cloned().unwrap_or(Value::Null);
            let messages = request
                .get("messages")
                .filter(|m| !m.is_null())
                .cloned()
                .unwrap_or_else(|| json!([]));
            json!({ "model": model, "messages": messages, "stream": false })
        }
    }
}

fn reply_text(dialect: ChatDialect, raw: &Value) -> String {
    let content = match dialect {
        ChatDialect::OpenAi => raw.pointer("/choices/0/message/content"),
        ChatDialect::Ollama => raw.pointer("/message/content"),
    };
    content
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}
