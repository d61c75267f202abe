use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use docgenie_core::config::{LlmConfig, LlmProvider};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::warn;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 1_500;

/// Chat-completion client for the configured provider. Failed calls are
/// retried `max_retries` times before the last error is returned.
pub struct HttpLlmClient {
    client: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build llm http client")?;

        let base_url = match (&config.base_url, config.provider) {
            (Some(url), _) => url.clone(),
            (None, LlmProvider::OpenAi) => OPENAI_DEFAULT_BASE_URL.to_string(),
            (None, LlmProvider::Anthropic) => ANTHROPIC_DEFAULT_BASE_URL.to_string(),
            (None, LlmProvider::Ollama) => bail!("llm.base_url is required for ollama provider"),
        };

        Ok(Self {
            client,
            provider: config.provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn send_once(&self, system: &str, prompt: &str) -> Result<String> {
        let request = match self.provider {
            LlmProvider::OpenAi => self
                .client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .bearer_auth(self.api_key_value()?)
                .json(&json!({
                    "model": self.model,
                    "temperature": 0,
                    "messages": [
                        {"role": "system", "content": system},
                        {"role": "user", "content": prompt},
                    ],
                })),
            LlmProvider::Anthropic => self
                .client
                .post(format!("{}/v1/messages", self.base_url))
                .header("x-api-key", self.api_key_value()?)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&json!({
                    "model": self.model,
                    "max_tokens": MAX_OUTPUT_TOKENS,
                    "system": system,
                    "messages": [{"role": "user", "content": prompt}],
                })),
            LlmProvider::Ollama => {
                self.client.post(format!("{}/api/chat", self.base_url)).json(&json!({
                    "model": self.model,
                    "stream": false,
                    "messages": [
                        {"role": "system", "content": system},
                        {"role": "user", "content": prompt},
                    ],
                }))
            }
        };

        let response = request.send().await.context("llm request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("llm provider returned status {}: {body}", status.as_u16());
        }

        let body: Value = response.json().await.context("llm response was not JSON")?;
        extract_text(self.provider, &body)
            .ok_or_else(|| anyhow!("llm response did not contain completion text"))
    }

    fn api_key_value(&self) -> Result<&str> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or_else(|| anyhow!("llm.api_key is not configured"))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let attempts = self.max_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.send_once(system, prompt).await {
                Ok(text) => return Ok(text),
                Err(error) => {
                    warn!(
                        event_name = "llm.request_failed",
                        attempt,
                        attempts,
                        error = %error,
                        "llm completion attempt failed"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("llm completion was not attempted")))
    }
}

fn extract_text(provider: LlmProvider, body: &Value) -> Option<String> {
    let text = match provider {
        LlmProvider::OpenAi => body.pointer("/choices/0/message/content"),
        LlmProvider::Anthropic => body.pointer("/content/0/text"),
        LlmProvider::Ollama => body.pointer("/message/content"),
    };
    text.and_then(Value::as_str).map(str::to_owned)
}
