use std::net::SocketAddr;

use tracing::{error, info, warn};

mod access_log;
mod api;
mod app_state;
mod bootstrap;
mod config;
mod error;
mod router;
mod security;
mod test_runner;
#[cfg(test)]
mod test_support;
mod upstream;
mod workspace;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() {
    vibe_otel::init();

    let settings = match config::Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    log_startup(&settings);

    let addr = settings.addr;
    let app = match bootstrap::build(settings) {
        Ok(app) => app,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };
    info!(%addr, "vibe-relay listening");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }
}

fn log_startup(settings: &config::Settings) {
    info!(
        mode = settings.mode.as_str(),
        whisper = settings.whisper_url.as_deref().unwrap_or("disabled"),
        chat = settings.chat.as_ref().map(|c| c.url.as_str()).unwrap_or("disabled"),
        dialect = settings.chat.as_ref().map(|c| c.dialect.as_str()).unwrap_or("-"),
        sandbox = %settings.sandbox_root.display(),
        auth = settings.api_key.is_some(),
        "relay configured"
    );
    if settings.tests.allow_any {
        warn!(
            target: "vibe::tests",
            "VIBE_TEST_ALLOW_ANY is set: /test/run will execute any command a client sends"
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!("SIGTERM handler unavailable: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}
