//! Completion clients implementing the coordinator's LLM port.
//!
//! [`OpenAiCompatClient`] talks to one `/chat/completions` endpoint.
//! [`FallbackLlm`] tries providers in order and only leaves the first one
//! when the caller allows fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use edrr_coordination::{LlmError, LlmPort};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{AgentsConfig, Endpoint};

/// Chat-completions client for an OpenAI-compatible server.
pub struct OpenAiCompatClient {
    endpoint: Endpoint,
    temperature: f64,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        endpoint: Endpoint,
        timeout: Duration,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Unavailable(format!("HTTP client: {}", e)))?;
        Ok(Self {
            endpoint,
            temperature,
            max_tokens,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.endpoint.model
    }

    fn request_body(&self, prompt: &str, system_prompt: &str) -> Value {
        serde_json::json!({
            "model": self.endpoint.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens
        })
    }
}

#[async_trait]
impl LlmPort for OpenAiCompatClient {
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        _fallback_allowed: bool,
    ) -> Result<String, LlmError> {
        let start = Instant::now();
        let url = format!(
            "{}/chat/completions",
            self.endpoint.url.trim_end_matches('/')
        );

        let mut request = self
            .client
            .post(&url)
            .json(&self.request_body(prompt, system_prompt));
        if let Some(key) = &self.endpoint.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!(
                "{} returned {}: {}",
                self.endpoint.model, status, body
            )));
        }

        let resp_json: Value = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;
        let content = extract_content(&resp_json)?;

        debug!(
            model = %self.endpoint.model,
            duration_ms = start.elapsed().as_millis() as u64,
            chars = content.len(),
            "Completion received"
        );
        Ok(content)
    }
}

/// Pull the assistant message out of a chat-completions response.
pub fn extract_content(response: &Value) -> Result<String, LlmError> {
    response["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LlmError::ParseError("response has no message content".into()))
}

/// Ordered provider chain.
pub struct FallbackLlm {
    providers: Vec<(String, Arc<dyn LlmPort>)>,
}

impl FallbackLlm {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn LlmPort>) -> Self {
        self.providers.push((name.into(), provider));
        self
    }

    /// One HTTP client per configured endpoint, primary first.
    pub fn from_config(config: &AgentsConfig) -> Result<Self, LlmError> {
        let mut chain = Self::new();
        for endpoint in config.endpoints() {
            let client = OpenAiCompatClient::new(
                endpoint.clone(),
                config.timeout,
                config.temperature,
                config.max_tokens,
            )?;
            chain = chain.with_provider(endpoint.model.clone(), Arc::new(client));
        }
        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for FallbackLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmPort for FallbackLlm {
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        fallback_allowed: bool,
    ) -> Result<String, LlmError> {
        let allowed = if fallback_allowed {
            self.providers.len()
        } else {
            self.providers.len().min(1)
        };
        if allowed == 0 {
            return Err(LlmError::Unavailable("no providers configured".into()));
        }

        let mut failures = Vec::new();
        for (name, provider) in self.providers.iter().take(allowed) {
            match provider.complete(prompt, system_prompt, false).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(provider = %name, error = %e, "Provider failed");
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }
        Err(LlmError::AllProvidersFailed(failures))
    }
}
