//! Tracing setup shared by the relay binaries.
//!
//! Console output is always installed. When `VIBE_ACCESS_LOG_ROLL=1`, events
//! with the `http.access` target are additionally written to a rolling file.

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Target used by the relay's access-log middleware.
pub const ACCESS_TARGET: &str = "http.access";

static ACCESS_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

impl Rotation {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        }
    }
}

/// Truthiness shared by every on/off environment switch of the relay.
pub fn flag_enabled(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Rolling access-log destination, if one was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogFile {
    pub dir: String,
    pub prefix: String,
    pub rotation: Rotation,
}

impl AccessLogFile {
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !lookup("VIBE_ACCESS_LOG_ROLL").is_some_and(|v| flag_enabled(&v)) {
            return None;
        }
        let dir = lookup("VIBE_ACCESS_LOG_DIR")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "logs".to_string());
        let prefix = lookup("VIBE_ACCESS_LOG_PREFIX")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "http-access".to_string());
        let rotation = lookup("VIBE_ACCESS_LOG_ROTATION")
            .map(|v| Rotation::parse(&v))
            .unwrap_or(Rotation::Daily);
        Some(Self {
            dir,
            prefix,
            rotation,
        })
    }
}

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let access = AccessLogFile::from_lookup(|key| std::env::var(key).ok());
    install_console(filter, access);
}

fn install_console(filter: EnvFilter, access: Option<AccessLogFile>) {
    let registry = tracing_subscriber::registry().with(fmt::layer().with_filter(filter));
    let Some(access) = access else {
        let _ = registry.try_init();
        return;
    };

    if std::fs::create_dir_all(&access.dir).is_err() {
        tracing::warn!(directory = %access.dir, "failed to create access log directory");
    }
    let writer = match access.rotation {
        Rotation::Hourly => tracing_appender::rolling::hourly(&access.dir, &access.prefix),
        Rotation::Minutely => tracing_appender::rolling::minutely(&access.dir, &access.prefix),
        Rotation::Daily => tracing_appender::rolling::daily(&access.dir, &access.prefix),
    };
    let (nb, guard) = tracing_appender::non_blocking(writer);
    let _ = ACCESS_GUARD.set(guard);
    let targets = Targets::new().with_target(ACCESS_TARGET, tracing::Level::INFO);
    let access_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(nb)
        .with_filter(targets);
    let _ = registry.with(access_layer).try_init();
}
