//! Process configuration.
//!
//! The environment is read exactly once at startup into [`Settings`]; every
//! component receives the resulting value through [`crate::AppState`].

use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

const DEFAULT_WHISPER_URL: &str = "http://127.0.0.1:8080/transcribe";
const DEFAULT_CHAT_URL: &str = "http://127.0.0.1:8081/v1/chat/completions";
const DEFAULT_PORT: u16 = 8787;
const DEFAULT_TEST_CMD: &str = "npx vitest run --reporter=basic";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_CONC: usize = 256;
const DEFAULT_PATCH_MAX_BYTES: usize = 4 * 1024 * 1024;
const OLLAMA_CHAT_PATH: &str = "/api/chat";

static LOOPBACK_ORIGIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^http://(localhost|127\.0\.0\.1):\d+$").expect("static origin pattern")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum ConfigError {
    #[error("invalid {key}: {value}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("invalid {key}: {value} is not an absolute http(s) URL")]
    InvalidUrl { key: &'static str, value: String },
    #[error("invalid VIBE_CHAT_DIALECT: {0} (expected openai or ollama)")]
    InvalidDialect(String),
    #[error("invalid VIBE_BIND: {0}")]
    InvalidBind(String),
    #[error("invalid VIBE_SANDBOX_DIR: {0} must stay inside the working directory")]
    InvalidSandbox(String),
    #[error("VIBE_PUBLIC is set but VIBE_API_KEY is empty; refusing to start")]
    PublicWithoutKey,
    #[error("VIBE_BIND={0} is not loopback and VIBE_API_KEY is empty; refusing to start")]
    ExposedWithoutKey(String),
}

/// Wire dialect spoken by the chat backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChatDialect {
    /// `POST /v1/chat/completions`, reply text at `choices[0].message.content`.
    OpenAi,
    /// `POST /api/chat`, reply text at `message.content`.
    Ollama,
}

impl ChatDialect {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-chat" => Ok(ChatDialect::OpenAi),
            "ollama" => Ok(ChatDialect::Ollama),
            other => Err(ConfigError::InvalidDialect(other.to_string())),
        }
    }

    fn infer(url: &url::Url) -> Self {
        if url.path().trim_end_matches('/').ends_with(OLLAMA_CHAT_PATH) {
            ChatDialect::Ollama
        } else {
            ChatDialect::OpenAi
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ChatDialect::OpenAi => "openai",
            ChatDialect::Ollama => "ollama",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChatUpstream {
    pub url: String,
    pub dialect: ChatDialect,
}

/// Which browser origins get `Access-Control-Allow-Origin` echoed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OriginPolicy {
    /// Any `http://localhost:<port>` or `http://127.0.0.1:<port>`.
    Loopback,
    /// Exact matches only.
    List(Vec<String>),
}

impl OriginPolicy {
    pub(crate) fn allows(&self, origin: &str) -> bool {
        match self {
            OriginPolicy::Loopback => LOOPBACK_ORIGIN.is_match(origin),
            OriginPolicy::List(list) => list.iter().any(|allowed| allowed == origin),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Private,
    Public,
}

impl Mode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Mode::Private => "private",
            Mode::Public => "public",
        }
    }
}

/// Which commands `POST /test/run` may execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TestPolicy {
    pub default_cmd: String,
    pub allowed: Vec<String>,
    pub allow_any: bool,
    pub timeout: Option<Duration>,
}

impl TestPolicy {
    pub(crate) fn permits(&self, cmd: &str) -> bool {
        self.allow_any || cmd == self.default_cmd || self.allowed.iter().any(|c| c == cmd)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub whisper_url: Option<String>,
    pub chat: Option<ChatUpstream>,
    pub origins: OriginPolicy,
    pub api_key: Option<String>,
    pub upstream_token: Option<String>,
    pub mode: Mode,
    /// Directory client paths are resolved against (the working directory).
    pub project_root: PathBuf,
    /// Directory every resolved path must stay under.
    pub sandbox_root: PathBuf,
    pub patch_max_bytes: usize,
    pub tests: TestPolicy,
    pub http_timeout: Duration,
    pub access_log: bool,
    pub addr: SocketAddr,
    pub concurrency_limit: usize,
}

impl Settings {
    pub(crate) fn from_env() -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_lookup(|key| std::env::var(key).ok(), &cwd)
    }

    pub(crate) fn from_lookup<F>(lookup: F, cwd: &Path) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |keys: &[&str]| keys.iter().find_map(|key| lookup(key));
        let flag = |key: &str| lookup(key).is_some_and(|v| vibe_otel::flag_enabled(&v));
        let secret = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let whisper_url = upstream_url(
            "VIBE_WHISPER_URL",
            var(&["VIBE_WHISPER_URL", "WHISPER_HTTP"]),
            DEFAULT_WHISPER_URL,
        )?;

        let chat = match upstream_url(
            "VIBE_CHAT_URL",
            var(&["VIBE_CHAT_URL", "LLAMA_CHAT"]),
            DEFAULT_CHAT_URL,
        )? {
            Some(url) => {
                let dialect = match lookup("VIBE_CHAT_DIALECT").filter(|v| !v.trim().is_empty()) {
                    Some(raw) => ChatDialect::parse(&raw)?,
                    None => url::Url::parse(&url)
                        .map(|parsed| ChatDialect::infer(&parsed))
                        .unwrap_or(ChatDialect::OpenAi),
                };
                Some(ChatUpstream { url, dialect })
            }
            None => None,
        };

        let origins = match lookup("VIBE_ALLOWED_ORIGINS").filter(|v| !v.trim().is_empty()) {
            Some(raw) => OriginPolicy::List(
                raw.split(',')
                    .map(|s| s.trim().trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            None => OriginPolicy::Loopback,
        };

        let api_key = secret("VIBE_API_KEY");
        let mode = if flag("VIBE_PUBLIC") {
            Mode::Public
        } else {
            Mode::Private
        };
        if mode == Mode::Public && api_key.is_none() {
            return Err(ConfigError::PublicWithoutKey);
        }

        let sandbox_dir = lookup("VIBE_SANDBOX_DIR")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| ".".to_string());
        let sandbox_rel = normalize_inside(Path::new(&sandbox_dir))
            .ok_or_else(|| ConfigError::InvalidSandbox(sandbox_dir.clone()))?;

        let allowed = lookup("VIBE_TEST_ALLOW")
            .map(|raw| {
                raw.split(';')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let tests = TestPolicy {
            default_cmd: lookup("VIBE_TEST_CMD")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_TEST_CMD.to_string()),
            allowed,
            allow_any: flag("VIBE_TEST_ALLOW_ANY"),
            timeout: number::<u64>(&lookup, "VIBE_TEST_TIMEOUT_SECS")?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        };

        let http_timeout = Duration::from_secs(
            number::<u64>(&lookup, "VIBE_HTTP_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS)
                .max(1),
        );

        let port_raw = var(&["VIBE_PORT", "PORT"]).filter(|v| !v.trim().is_empty());
        let port = match port_raw {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidNumber {
                    key: "VIBE_PORT",
                    value: raw.clone(),
                })?,
            None => DEFAULT_PORT,
        };
        let default_bind = match mode {
            Mode::Private => "127.0.0.1",
            Mode::Public => "0.0.0.0",
        };
        let bind = lookup("VIBE_BIND")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default_bind.to_string());
        let ip = parse_bind(&bind).ok_or_else(|| ConfigError::InvalidBind(bind.clone()))?;
        if !ip.is_loopback() && api_key.is_none() {
            return Err(ConfigError::ExposedWithoutKey(bind));
        }

        Ok(Settings {
            whisper_url,
            chat,
            origins,
            api_key,
            upstream_token: secret("VIBE_UPSTREAM_TOKEN"),
            mode,
            project_root: cwd.to_path_buf(),
            sandbox_root: if sandbox_rel.as_os_str().is_empty() {
                cwd.to_path_buf()
            } else {
                cwd.join(sandbox_rel)
            },
            patch_max_bytes: number::<usize>(&lookup, "VIBE_PATCH_MAX_BYTES")?
                .unwrap_or(DEFAULT_PATCH_MAX_BYTES),
            tests,
            http_timeout,
            access_log: flag("VIBE_ACCESS_LOG") || flag("VIBE_ACCESS_LOG_ROLL"),
            addr: SocketAddr::new(ip, port),
            concurrency_limit: number::<usize>(&lookup, "VIBE_HTTP_MAX_CONC")?
                .unwrap_or(DEFAULT_MAX_CONC)
                .max(1),
        })
    }
}

/// `None` when the variable is set but blank, which disables the upstream.
fn upstream_url(
    key: &'static str,
    raw: Option<String>,
    default: &str,
) -> Result<Option<String>, ConfigError> {
    let value = match raw {
        Some(v) if v.trim().is_empty() => return Ok(None),
        Some(v) => v.trim().to_string(),
        None => default.to_string(),
    };
    match url::Url::parse(&value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(Some(value)),
        _ => Err(ConfigError::InvalidUrl { key, value }),
    }
}

fn number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidNumber { key, value: raw })
        })
        .transpose()
}

fn parse_bind(bind: &str) -> Option<IpAddr> {
    match bind.to_ascii_lowercase().as_str() {
        "localhost" => Some(IpAddr::from([127, 0, 0, 1])),
        other => other.trim_matches(|c| c == '[' || c == ']').parse().ok(),
    }
}

/// Lexically normalizes a relative path, refusing anything that climbs above
/// its starting point. An empty result means "the starting point itself".
pub(crate) fn normalize_inside(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned(), Path::new("/work/app"))
    }

    #[test]
    fn defaults_point_at_local_backends() {
        let settings = load(&[]).expect("defaults");
        assert_eq!(settings.whisper_url.as_deref(), Some(DEFAULT_WHISPER_URL));
        let chat = settings.chat.expect("chat upstream");
        assert_eq!(chat.url, DEFAULT_CHAT_URL);
        assert_eq!(chat.dialect, ChatDialect::OpenAi);
        assert_eq!(settings.origins, OriginPolicy::Loopback);
        assert_eq!(settings.mode, Mode::Private);
        assert_eq!(settings.addr, "127.0.0.1:8787".parse::<SocketAddr>().unwrap());
        assert_eq!(settings.sandbox_root, PathBuf::from("/work/app"));
        assert_eq!(settings.tests.default_cmd, DEFAULT_TEST_CMD);
        assert!(settings.tests.timeout.is_none());
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn blank_upstream_disables_it() {
        let settings = load(&[("VIBE_WHISPER_URL", ""), ("LLAMA_CHAT", " ")]).expect("settings");
        assert!(settings.whisper_url.is_none());
        assert!(settings.chat.is_none());
    }

    #[test]
    fn legacy_names_are_honoured() {
        let settings = load(&[
            ("WHISPER_HTTP", "http://10.0.0.2:9000/asr"),
            ("PORT", "9999"),
        ])
        .expect("settings");
        assert_eq!(
            settings.whisper_url.as_deref(),
            Some("http://10.0.0.2:9000/asr")
        );
        assert_eq!(settings.addr.port(), 9999);
    }

    #[test]
    fn chat_dialect_is_resolved_once() {
        let inferred = load(&[("VIBE_CHAT_URL", "http://127.0.0.1:11434/api/chat")])
            .expect("settings")
            .chat
            .expect("chat");
        assert_eq!(inferred.dialect, ChatDialect::Ollama);

        let forced = load(&[
            ("VIBE_CHAT_URL", "http://127.0.0.1:11434/api/chat"),
            ("VIBE_CHAT_DIALECT", "openai"),
        ])
        .expect("settings")
        .chat
        .expect("chat");
        assert_eq!(forced.dialect, ChatDialect::OpenAi);

        assert_eq!(
            load(&[("VIBE_CHAT_DIALECT", "gemini")]).unwrap_err(),
            ConfigError::InvalidDialect("gemini".into())
        );
    }

    #[test]
    fn rejects_non_http_upstreams() {
        let err = load(&[("VIBE_CHAT_URL", "ftp://example/chat")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { key: "VIBE_CHAT_URL", .. }));
    }

    #[test]
    fn public_mode_requires_api_key() {
        assert_eq!(
            load(&[("VIBE_PUBLIC", "1")]).unwrap_err(),
            ConfigError::PublicWithoutKey
        );
        let settings = load(&[("VIBE_PUBLIC", "true"), ("VIBE_API_KEY", "s3cret")])
            .expect("public settings");
        assert_eq!(settings.mode, Mode::Public);
        assert_eq!(settings.addr.ip().to_string(), "0.0.0.0");
        assert_eq!(settings.api_key.as_deref(), Some("s3cret"));
    }

    #[test]
    fn exposed_bind_requires_api_key() {
        assert_eq!(
            load(&[("VIBE_BIND", "0.0.0.0")]).unwrap_err(),
            ConfigError::ExposedWithoutKey("0.0.0.0".into())
        );
        let settings = load(&[("VIBE_BIND", "::1")]).expect("loopback v6");
        assert!(settings.addr.ip().is_loopback());
        let settings = load(&[("VIBE_BIND", "0.0.0.0"), ("VIBE_API_KEY", "k")])
            .expect("keyed bind");
        assert_eq!(settings.mode, Mode::Private);
        assert!(matches!(
            load(&[("VIBE_BIND", "example.com")]).unwrap_err(),
            ConfigError::InvalidBind(_)
        ));
    }

    #[test]
    fn origin_list_is_exact() {
        let settings = load(&[(
            "VIBE_ALLOWED_ORIGINS",
            "http://localhost:5173, https://ide.example.com/",
        )])
        .expect("settings");
        assert!(settings.origins.allows("http://localhost:5173"));
        assert!(settings.origins.allows("https://ide.example.com"));
        assert!(!settings.origins.allows("http://localhost:3000"));
    }

    #[test]
    fn blank_origin_list_keeps_loopback_rule() {
        let settings = load(&[("VIBE_ALLOWED_ORIGINS", "  ")]).expect("settings");
        assert_eq!(settings.origins, OriginPolicy::Loopback);
        assert!(settings.origins.allows("http://localhost:5173"));
    }

    #[test]
    fn rolling_access_log_implies_access_events() {
        assert!(load(&[("VIBE_ACCESS_LOG_ROLL", "true")]).expect("settings").access_log);
        assert!(load(&[("VIBE_ACCESS_LOG", "on")]).expect("settings").access_log);
        assert!(!load(&[("VIBE_ACCESS_LOG", "0")]).expect("settings").access_log);
    }

    #[test]
    fn loopback_policy_matches_any_port() {
        let policy = OriginPolicy::Loopback;
        assert!(policy.allows("http://localhost:5173"));
        assert!(policy.allows("http://127.0.0.1:80"));
        assert!(!policy.allows("https://localhost:5173"));
        assert!(!policy.allows("http://localhost.evil.com:5173"));
        assert!(!policy.allows("http://localhost"));
    }

    #[test]
    fn sandbox_dir_cannot_escape_cwd() {
        let settings = load(&[("VIBE_SANDBOX_DIR", "src")]).expect("settings");
        assert_eq!(settings.sandbox_root, PathBuf::from("/work/app/src"));
        assert!(matches!(
            load(&[("VIBE_SANDBOX_DIR", "../other")]).unwrap_err(),
            ConfigError::InvalidSandbox(_)
        ));
    }

    #[test]
    fn test_policy_parses_allow_list() {
        let settings = load(&[
            ("VIBE_TEST_CMD", "cargo test"),
            ("VIBE_TEST_ALLOW", "npm test; npm run lint ;"),
            ("VIBE_TEST_TIMEOUT_SECS", "30"),
        ])
        .expect("settings");
        let policy = settings.tests;
        assert!(policy.permits("cargo test"));
        assert!(policy.permits("npm run lint"));
        assert!(!policy.permits("rm -rf /"));
        assert_eq!(policy.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        assert_eq!(
            load(&[("VIBE_PORT", "eighty")]).unwrap_err(),
            ConfigError::InvalidNumber {
                key: "VIBE_PORT",
                value: "eighty".into()
            }
        );
        assert!(matches!(
            load(&[("VIBE_HTTP_MAX_CONC", "-1")]).unwrap_err(),
            ConfigError::InvalidNumber { key: "VIBE_HTTP_MAX_CONC", .. }
        ));
    }

    #[test]
    fn normalize_inside_refuses_climbing() {
        assert_eq!(normalize_inside(Path::new("a/./b")), Some(PathBuf::from("a/b")));
        assert_eq!(normalize_inside(Path::new("a/../b")), Some(PathBuf::from("b")));
        assert_eq!(normalize_inside(Path::new(".")), Some(PathBuf::new()));
        assert_eq!(normalize_inside(Path::new("a/../../b")), None);
        assert_eq!(normalize_inside(Path::new("/etc/passwd")), None);
    }
}
