//! Shared fixtures for route tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::server::AppState;
use crate::assistant::ContractAssistant;
use crate::cache::{MemoryStore, ResponseCache};
use crate::error::{ProviderError, Result};
use crate::providers::{ChatOptions, LLMProvider, LLMResponse, Message};
use crate::retry::RetryOptions;
use crate::utils::BestEffort;

/// What the stub provider does on every call.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    Answer(&'static str),
    Fail(ProviderError),
}

struct StubProvider {
    script: Script,
}

#[async_trait]
impl LLMProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn default_model(&self) -> &str {
        "stub-model"
    }

    async fn chat(
        &self,
        _messages: Vec<Message>,
        _model: Option<&str>,
        _options: ChatOptions,
    ) -> Result<LLMResponse> {
        match &self.script {
            Script::Answer(text) => Ok(LLMResponse::text(text)),
            Script::Fail(e) => Err(e.clone().into()),
        }
    }
}

fn fast_retry() -> RetryOptions {
    RetryOptions::default().with_initial_delay(Duration::from_millis(1))
}

/// State without a cache.
pub(crate) fn scripted_state(script: Script) -> AppState {
    let assistant = ContractAssistant::new(Arc::new(StubProvider { script }), None)
        .with_retry(fast_retry());
    AppState::new(Arc::new(assistant))
}

/// State with a memory-backed cache; the store is returned for inspection.
pub(crate) fn scripted_state_with_cache(script: Script) -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let cache = ResponseCache::new(store.clone(), BestEffort::new());
    let assistant = ContractAssistant::new(Arc::new(StubProvider { script }), Some(cache))
        .with_retry(fast_retry());
    (AppState::new(Arc::new(assistant)), store)
}
