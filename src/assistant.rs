//! The completion request handler.
//!
//! `answer` validates the question, consults the cache, calls the upstream
//! model through the retry executor on a miss, and schedules a best-effort
//! cache write for the fresh answer. Cache faults are logged and absorbed;
//! only validation, cancellation, permanent upstream failures and
//! [`CrewError::RetryExhausted`] reach the caller.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{normalize_query, CacheContext, CompositeKey, ResponseCache};
use crate::config::{AssistantConfig, Config};
use crate::error::{CrewError, ProviderError, Result};
use crate::providers::{ChatOptions, LLMProvider, Message};
use crate::retry::{execute_with_retry, RetryOptions};

/// A question plus its scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskRequest {
    pub query: String,
    pub context: CacheContext,
}

impl AskRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: CacheContext::new(),
        }
    }

    pub fn with_context(mut self, context: CacheContext) -> Self {
        self.context = context;
        self
    }
}

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    Cache,
    Upstream,
}

/// An answer and its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub source: AnswerSource,
}

/// Cache-then-call-then-cache handler for contract questions.
pub struct ContractAssistant {
    provider: Arc<dyn LLMProvider>,
    cache: Option<ResponseCache>,
    retry: RetryOptions,
    options: ChatOptions,
    settings: AssistantConfig,
}

impl std::fmt::Debug for ContractAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractAssistant")
            .field("provider", &self.provider.name())
            .field("cache", &self.cache.as_ref().map(ResponseCache::backend))
            .field("retry", &self.retry)
            .finish()
    }
}

impl ContractAssistant {
    /// Build with default settings. `cache = None` disables caching.
    pub fn new(provider: Arc<dyn LLMProvider>, cache: Option<ResponseCache>) -> Self {
        Self {
            provider,
            cache,
            retry: RetryOptions::default(),
            options: ChatOptions::new(),
            settings: AssistantConfig::default(),
        }
    }

    /// Build with retry, sampling and prompt settings taken from `config`.
    pub fn from_config(
        config: &Config,
        provider: Arc<dyn LLMProvider>,
        cache: Option<ResponseCache>,
    ) -> Self {
        let mut options = ChatOptions::new();
        if let Some(max_tokens) = config.provider.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = config.provider.temperature {
            options = options.with_temperature(temperature);
        }
        Self {
            provider,
            cache,
            retry: RetryOptions::from(&config.retry),
            options,
            settings: config.assistant.clone(),
        }
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settings(mut self, settings: AssistantConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    /// Answer `request`, giving up when `cancel` fires.
    pub async fn answer(&self, request: &AskRequest, cancel: &CancellationToken) -> Result<Answer> {
        self.validate(request)?;
        let key = CompositeKey::new(&request.query, request.context.clone());

        if let Some(cache) = &self.cache {
            match cache.lookup(&key).await {
                Ok(Some(text)) => {
                    return Ok(Answer {
                        text,
                        source: AnswerSource::Cache,
                    })
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Cache lookup failed, treating as miss"),
            }
        }

        let messages = self.build_messages(request);
        let provider = Arc::clone(&self.provider);
        let options = self.options.clone();
        let text = execute_with_retry(
            |attempt| {
                let provider = Arc::clone(&provider);
                let messages = messages.clone();
                let options = options.clone();
                async move {
                    if !attempt.is_first() {
                        info!(attempt = attempt.index + 1, "Retrying upstream call");
                    }
                    let response = provider.chat(messages, None, options).await?;
                    if response.content.trim().is_empty() {
                        return Err(ProviderError::InvalidResponse("empty answer".into()).into());
                    }
                    if let Some(usage) = response.usage {
                        debug!(
                            prompt_tokens = usage.prompt_tokens,
                            completion_tokens = usage.completion_tokens,
                            total_tokens = usage.total_tokens,
                            "Upstream usage"
                        );
                    }
                    Ok(response.content)
                }
            },
            &self.retry,
            cancel,
        )
        .await?;

        if let Some(cache) = &self.cache {
            cache.store_detached(key, text.clone());
        }

        Ok(Answer {
            text,
            source: AnswerSource::Upstream,
        })
    }

    fn validate(&self, request: &AskRequest) -> Result<()> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(CrewError::Validation("query must not be empty".into()));
        }
        // Punctuation- or emoji-only input folds to an empty key that every
        // such question would share.
        if normalize_query(query).is_empty() {
            return Err(CrewError::Validation(
                "query must contain at least one letter or digit".into(),
            ));
        }
        let chars = query.chars().count();
        if chars > self.settings.max_query_chars {
            return Err(CrewError::Validation(format!(
                "query is {chars} characters, limit is {}",
                self.settings.max_query_chars
            )));
        }
        Ok(())
    }

    fn build_messages(&self, request: &AskRequest) -> Vec<Message> {
        let mut user = String::new();
        if !request.context.is_empty() {
            user.push_str("Context:\n");
            for (k, v) in request.context.iter() {
                user.push_str(&format!("- {k}: {v}\n"));
            }
            user.push('\n');
        }
        user.push_str(request.query.trim());
        vec![
            Message::system(self.settings.system_prompt.clone()),
            Message::user(user),
        ]
    }
}
