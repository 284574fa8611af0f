use std::sync::Arc;

use crate::config::Settings;
use crate::test_runner::TestRunner;
use crate::upstream::asr::AsrBridge;
use crate::upstream::chat::ChatBridge;
use crate::workspace::Sandbox;

#[derive(Clone)]
pub(crate) struct AppState {
    settings: Arc<Settings>,
    asr: Arc<AsrBridge>,
    chat: Arc<ChatBridge>,
    sandbox: Arc<Sandbox>,
    tests: Arc<TestRunner>,
    endpoints: Arc<Vec<String>>,
}

impl AppState {
    /// Wires every component from one immutable [`Settings`] and a shared
    /// upstream HTTP client.
    pub fn new(settings: Settings, client: reqwest::Client, endpoints: Vec<String>) -> Self {
        let asr = AsrBridge::new(
            client.clone(),
            settings.whisper_url.clone(),
            settings.upstream_token.clone(),
        );
        let chat = ChatBridge::new(
            client,
            settings.chat.clone(),
            settings.upstream_token.clone(),
        );
        let sandbox = Sandbox::new(
            settings.project_root.clone(),
            settings.sandbox_root.clone(),
            settings.patch_max_bytes,
        );
        let tests = TestRunner::new(settings.project_root.clone(), settings.tests.clone());
        Self {
            settings: Arc::new(settings),
            asr: Arc::new(asr),
            chat: Arc::new(chat),
            sandbox: Arc::new(sandbox),
            tests: Arc::new(tests),
            endpoints: Arc::new(endpoints),
        }
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.clone()
    }

    pub fn asr(&self) -> Arc<AsrBridge> {
        self.asr.clone()
    }

    pub fn chat(&self) -> Arc<ChatBridge> {
        self.chat.clone()
    }

    pub fn sandbox(&self) -> Arc<Sandbox> {
        self.sandbox.clone()
    }

    pub fn tests(&self) -> Arc<TestRunner> {
        self.tests.clone()
    }

    pub fn endpoints(&self) -> Arc<Vec<String>> {
        self.endpoints.clone()
    }
}
