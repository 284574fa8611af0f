use std::mem;

use axum::{
    handler::Handler,
    routing::{get, post},
    Router,
};

use crate::{api, AppState};

/// Collects routes and remembers `"METHOD /path"` for each, so `/about` can
/// list exactly what is mounted.
pub(crate) struct RouterBuilder {
    router: Router<AppState>,
    endpoints: Vec<String>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            endpoints: Vec::new(),
        }
    }

    fn record(&mut self, method: &str, path: &'static str) {
        self.endpoints.push(format!("{} {}", method, path));
    }

    pub fn route_get<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.record("GET", path);
        let router = mem::take(&mut self.router);
        self.router = router.route(path, get(handler));
        self
    }

    pub fn route_post<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.record("POST", path);
        let router = mem::take(&mut self.router);
        self.router = router.route(path, post(handler));
        self
    }

    pub fn build(self) -> (Router<AppState>, Vec<String>) {
        (self.router, self.endpoints)
    }
}

pub(crate) mod paths {
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
    pub const ASR: &str = "/asr";
    pub const ASR_HEALTH: &str = "/asr/health";
    pub const CHAT: &str = "/chat";
    pub const PATCH_PREVIEW: &str = "/patch/preview";
    pub const PATCH_APPLY: &str = "/patch/apply";
    pub const TEST_RUN: &str = "/test/run";
}

pub(crate) fn build_router() -> (Router<AppState>, Vec<String>) {
    let mut builder = RouterBuilder::new();
    builder
        .route_get(paths::HEALTH, api::meta::health)
        .route_get(paths::ABOUT, api::meta::about)
        .route_get(paths::ASR_HEALTH, api::asr::asr_health)
        .route_post(paths::ASR, api::asr::transcribe)
        .route_post(paths::CHAT, api::chat::chat)
        .route_post(paths::PATCH_PREVIEW, api::patch::preview)
        .route_post(paths::PATCH_APPLY, api::patch::apply)
        .route_post(paths::TEST_RUN, api::test_run::run);
    builder.build()
}
