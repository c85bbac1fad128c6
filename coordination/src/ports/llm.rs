//! LLM completion port.
//!
//! The orchestration core never calls a model directly. Agents hold an
//! `Arc<dyn LlmPort>` and go through this interface.

use async_trait::async_trait;

/// Error type for completion calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("All providers failed: {0:?}")]
    AllProvidersFailed(Vec<String>),
}

/// Text completion with optional provider fallback.
#[async_trait]
pub trait LlmPort: Send + Sync {
    /// Complete `prompt` under `system_prompt`.
    ///
    /// When `fallback_allowed` is false the implementation must not route
    /// the request to a secondary provider.
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        fallback_allowed: bool,
    ) -> Result<String, LlmError>;
}
