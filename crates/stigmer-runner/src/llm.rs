//! Model provider seam
//!
//! The LLM provider is an external collaborator; the agent runner only
//! depends on this trait. Provider and model come from the environment
//! (`LLM_PROVIDER`, `LLM_MODEL`, `<PROVIDER>_API_KEY`).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use stigmer_core::{StigmerError, StigmerResult};

const DEFAULT_PROVIDER: &str = "anthropic";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// One agent completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub instructions: String,
    pub message: String,
    pub temperature: Option<f64>,
    /// Markdown bodies of the skills the agent loaded
    pub skills: Vec<String>,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> StigmerResult<String>;
}

/// Provider/model/key resolved from the environment
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        let provider = std::env::var("LLM_PROVIDER")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
        let model = std::env::var("LLM_MODEL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let key_var = format!("{}_API_KEY", provider.to_ascii_uppercase());
        let api_key = std::env::var(key_var).ok().filter(|v| !v.is_empty());
        Self {
            provider,
            model,
            api_key,
        }
    }
}

/// Build the configured provider, or the unconfigured stub when no key is
/// present (each call then fails with a clear message instead of at boot).
pub fn provider_from_env() -> std::sync::Arc<dyn ModelProvider> {
    let config = ProviderConfig::from_env();
    match &config.api_key {
        Some(_) => std::sync::Arc::new(HttpChatProvider::new(config)),
        None => std::sync::Arc::new(UnconfiguredProvider {
            provider: config.provider,
        }),
    }
}

/// HTTP chat provider covering the anthropic and openai wire shapes
pub struct HttpChatProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl HttpChatProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn system_prompt(request: &CompletionRequest) -> String {
        let mut prompt = request.instructions.clone();
        for skill in &request.skills {
            prompt.push_str("\n\n---\n\n");
            prompt.push_str(skill);
        }
        prompt
    }
}

#[async_trait]
impl ModelProvider for HttpChatProvider {
    fn name(&self) -> &str {
        &self.config.provider
    }

    async fn complete(&self, request: CompletionRequest) -> StigmerResult<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| StigmerError::unavailable("model provider has no api key"))?;
        let model = request.model.clone().unwrap_or_else(|| self.config.model.clone());
        let system = Self::system_prompt(&request);

        let (url, request_builder) = match self.config.provider.as_str() {
            "anthropic" => {
                let body = json!({
                    "model": model,
                    "max_tokens": 4096,
                    "system": system,
                    "temperature": request.temperature,
                    "messages": [{ "role": "user", "content": request.message }],
                });
                let builder = self
                    .http
                    .post("https://api.anthropic.com/v1/messages")
                    .header("x-api-key", api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&body);
                ("api.anthropic.com", builder)
            }
            _ => {
                // openai-compatible chat completions
                let body = json!({
                    "model": model,
                    "temperature": request.temperature,
                    "messages": [
                        { "role": "system", "content": system },
                        { "role": "user", "content": request.message },
                    ],
                });
                let builder = self
                    .http
                    .post("https://api.openai.com/v1/chat/completions")
                    .bearer_auth(api_key)
                    .json(&body);
                ("api.openai.com", builder)
            }
        };

        let response = request_builder
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await
            .map_err(|e| StigmerError::unavailable(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StigmerError::internal(format!(
                "model call failed ({status}): {body}"
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| StigmerError::internal(format!("model response: {e}")))?;

        let text = match self.config.provider.as_str() {
            "anthropic" => value
                .pointer("/content/0/text")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => value
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(str::to_string),
        };

        text.ok_or_else(|| StigmerError::internal("model response carried no text"))
    }
}

struct UnconfiguredProvider {
    provider: String,
}

#[async_trait]
impl ModelProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        &self.provider
    }

    async fn complete(&self, _request: CompletionRequest) -> StigmerResult<String> {
        Err(StigmerError::unavailable(format!(
            "no api key configured for provider {} (set {}_API_KEY)",
            self.provider,
            self.provider.to_ascii_uppercase()
        )))
    }
}

/// Deterministic provider for tests and local dry runs
pub struct ScriptedProvider {
    reply: Box<dyn Fn(&CompletionRequest) -> String + Send + Sync>,
}

impl ScriptedProvider {
    pub fn new(reply: impl Fn(&CompletionRequest) -> String + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
        }
    }

    /// Echoes the incoming message
    pub fn echo() -> Self {
        Self::new(|request| format!("echo: {}", request.message))
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> StigmerResult<String> {
        Ok((self.reply)(&request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_provider_replies() {
        let provider = ScriptedProvider::echo();
        let reply = provider
            .complete(CompletionRequest {
                message: "ping".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(reply, "echo: ping");
    }
}
