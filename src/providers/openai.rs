//! OpenAI-compatible chat-completions provider.
//!
//! Speaks `POST {api_base}/chat/completions` with a bearer key. Works against
//! OpenAI itself and any gateway exposing the same shape.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{CrewError, ProviderError, Result};

use super::{parse_provider_error, ChatOptions, LLMProvider, LLMResponse, Message, Usage};

/// Default API base when none is configured.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Default model when none is configured or passed at call time.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Chat-completions client.
pub struct OpenAiProvider {
    api_key: String,
    api_base: String,
    model: String,
    client: Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(api_key: &str, api_base: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CrewError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }

    /// Build from the `provider` config section. Fails without an API key.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                CrewError::Config(
                    "no API key configured (set provider.api_key or CREWCLAUSE_API_KEY)".into(),
                )
            })?;
        Self::new(
            api_key,
            &config.api_base,
            &config.model,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn build_body(&self, messages: &[Message], model: &str, options: &ChatOptions) -> Value {
        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = options.temperature {
            body["temperature"] = json!(temp);
        }
        body
    }

    /// Answer text of the first choice, if it is a non-blank string.
    pub fn extract_text(response: &Value) -> Option<String> {
        response["choices"][0]["message"]["content"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .map(String::from)
    }

    fn extract_usage(response: &Value) -> Option<Usage> {
        let usage = response.get("usage")?;
        let prompt = usage["prompt_tokens"].as_u64()? as u32;
        let completion = usage["completion_tokens"].as_u64()? as u32;
        Some(Usage::new(prompt, completion))
    }

    /// `{"error": {"message": ...}}` when present, else the raw body.
    fn error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from))
            .unwrap_or_else(|| body.to_string())
    }
}

/// Parse a delay-seconds `Retry-After` header. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl LLMProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let model = model.unwrap_or(&self.model);
        let body = self.build_body(&messages, model, &options);

        debug!(model = model, messages = messages.len(), "Chat completion request");

        let response = self
            .client
            .post(self.api_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            let message = Self::error_message(&text);
            return Err(parse_provider_error(status.as_u16(), &message, retry_after).into());
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("unparseable body: {e}")))?;

        let content = Self::extract_text(&json)
            .ok_or_else(|| ProviderError::InvalidResponse("response carried no answer text".into()))?;

        let mut llm_response = LLMResponse::text(&content);
        if let Some(usage) = Self::extract_usage(&json) {
            llm_response = llm_response.with_usage(usage);
        }
        Ok(llm_response)
    }
}
