//! Language-model providers.
//!
//! [`LlmProvider`] is the single seam the chat pipeline talks to. The
//! concrete backend is picked once from `[llm] mode`:
//!
//! | Mode | Provider |
//! |------|----------|
//! | `mock` | [`MockLlm`]: echoes the transcript, no network |
//! | `openai` | [`OpenAiLlm`]: `POST {api_base}/chat/completions` |
//! | `azure` | [`AzureOpenAiLlm`]: deployment chat completions |
//! | `ollama` | [`OllamaLlm`]: `POST /api/chat` |
//!
//! Calls are made once with no retry; errors propagate to the caller.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LlmConfig, LlmMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Trait for chat-completion backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Produce the assistant reply for a full message list.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Provider name for logging.
    fn name(&self) -> &str;

    /// The model being used.
    fn model(&self) -> &str;
}

/// Deterministic provider that returns the transcript it was given, one
/// `role: content` block per message.
pub struct MockLlm;

#[async_trait]
impl LlmProvider for MockLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        Ok(messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "echo"
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Body shared by the OpenAI and Azure chat-completions endpoints.
fn completion_body(
    model: Option<&str>,
    messages: &[ChatMessage],
    config: &LlmConfig,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "messages": messages,
        "temperature": config.temperature,
    });
    if let Some(model) = model {
        body["model"] = serde_json::Value::String(model.to_string());
    }
    if let Some(max) = config.max_new_tokens {
        body["max_tokens"] = serde_json::Value::from(max);
    }
    body
}

/// Extract `choices[0].message.content`.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices[0].message.content"))
}

async fn send_json(req: reqwest::RequestBuilder, label: &str) -> Result<serde_json::Value> {
    let response = req
        .send()
        .await
        .with_context(|| format!("{} request failed", label))?;
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("{} API error {}: {}", label, status, body_text);
    }
    Ok(response.json().await?)
}

// ============ OpenAI ============

pub struct OpenAiLlm {
    model: String,
    api_base: String,
    api_key: String,
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            config: config.clone(),
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = completion_body(Some(&self.model), messages, &self.config);
        let req = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body);
        parse_completion(&send_json(req, "OpenAI").await?)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============ Azure OpenAI ============

pub struct AzureOpenAiLlm {
    endpoint: String,
    deployment: String,
    api_key: String,
    config: LlmConfig,
    client: reqwest::Client,
}

impl AzureOpenAiLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let endpoint = config
            .azure_endpoint
            .clone()
            .ok_or_else(|| anyhow!("llm.azure_endpoint required in azure mode"))?;
        let deployment = config
            .deployment_name
            .clone()
            .ok_or_else(|| anyhow!("llm.deployment_name required in azure mode"))?;
        let api_key = std::env::var("AZURE_OPENAI_API_KEY")
            .map_err(|_| anyhow!("AZURE_OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            deployment,
            api_key,
            config: config.clone(),
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LlmProvider for AzureOpenAiLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.config.api_version
        );
        let body = completion_body(None, messages, &self.config);
        let req = self
            .client
            .post(url)
            .header("api-key", &self.api_key)
            .json(&body);
        parse_completion(&send_json(req, "Azure OpenAI").await?)
    }

    fn name(&self) -> &str {
        "azure"
    }

    fn model(&self) -> &str {
        &self.deployment
    }
}

// ============ Ollama ============

pub struct OllamaLlm {
    model: String,
    url: String,
    config: LlmConfig,
    client: reqwest::Client,
}

impl OllamaLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone().unwrap_or_else(|| "llama3".to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
            config: config.clone(),
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut options = serde_json::json!({ "temperature": self.config.temperature });
        if let Some(max) = self.config.max_new_tokens {
            options["num_predict"] = serde_json::Value::from(max);
        }
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": options,
        });
        let req = self.client.post(format!("{}/api/chat", self.url)).json(&body);
        let json = send_json(req, "Ollama").await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Build the configured provider.
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let llm: Arc<dyn LlmProvider> = match config.mode {
        LlmMode::Mock => Arc::new(MockLlm),
        LlmMode::Openai => Arc::new(OpenAiLlm::new(config)?),
        LlmMode::Azure => Arc::new(AzureOpenAiLlm::new(config)?),
        LlmMode::Ollama => Arc::new(OllamaLlm::new(config)?),
    };
    tracing::info!(provider = llm.name(), model = llm.model(), "language model ready");
    Ok(llm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_roles() {
        let out = MockLlm
            .complete(&[ChatMessage::system("be brief"), ChatMessage::user("hi")])
            .await
            .unwrap();
        assert_eq!(out, "system: be brief\n\nuser: hi");
    }

    #[test]
    fn test_messages_serialize_lowercase_roles() {
        let json = serde_json::to_value(ChatMessage::user("x")).unwrap();
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn test_completion_body_optional_fields() {
        let mut config = LlmConfig::default();
        config.max_new_tokens = Some(64);
        let body = completion_body(Some("gpt"), &[ChatMessage::user("x")], &config);
        assert_eq!(body["model"], "gpt");
        assert_eq!(body["max_tokens"], 64);

        let azure = completion_body(None, &[], &LlmConfig::default());
        assert!(azure.get("model").is_none());
        assert!(azure.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_completion() {
        let json = serde_json::json!({"choices": [{"message": {"content": "42"}}]});
        assert_eq!(parse_completion(&json).unwrap(), "42");
        assert!(parse_completion(&serde_json::json!({})).is_err());
    }
}
