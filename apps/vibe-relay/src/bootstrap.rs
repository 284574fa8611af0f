use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};

use crate::config::Settings;
use crate::{access_log, router, security, AppState};

/// Request body cap for every route (audio uploads included).
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub(crate) enum BootstrapError {
    #[error("failed to build upstream HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub(crate) fn upstream_client(settings: &Settings) -> Result<reqwest::Client, BootstrapError> {
    let client = reqwest::Client::builder()
        .timeout(settings.http_timeout)
        .user_agent(concat!("vibe-relay/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Builds the fully layered application for `settings`.
pub(crate) fn build(settings: Settings) -> Result<axum::Router<()>, BootstrapError> {
    let client = upstream_client(&settings)?;
    let concurrency_limit = settings.concurrency_limit;
    let (router, endpoints) = router::build_router();
    let state = AppState::new(settings, client, endpoints);
    Ok(attach_global_layers(attach_http_layers(
        attach_stateful_layers(router, state),
        concurrency_limit,
    )))
}

/// Key gate innermost, CORS around it so preflights and 401s both carry
/// the CORS headers, access log outermost of the three.
pub(crate) fn attach_stateful_layers(
    router: axum::Router<AppState>,
    state: AppState,
) -> axum::Router<()> {
    router
        .layer(from_fn_with_state(state.clone(), security::api_key_mw))
        .layer(from_fn_with_state(state.clone(), security::cors_mw))
        .layer(from_fn_with_state(state.clone(), access_log::access_log_mw))
        .with_state::<()>(state)
}

pub(crate) fn attach_http_layers(
    router: axum::Router<()>,
    concurrency_limit: usize,
) -> axum::Router<()> {
    use tower::limit::ConcurrencyLimitLayer;
    use tower_http::trace::TraceLayer;

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
}

pub(crate) fn attach_global_layers(router: axum::Router<()>) -> axum::Router<()> {
    router.layer(from_fn(security::headers_mw))
}
