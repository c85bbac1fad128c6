use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Endpoint {
    /// Base URL, e.g. `http://localhost:8080/v1`.
    pub url: String,
    pub model: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<String>,
}

/// Runtime configuration for LLM-backed agents.
#[derive(Debug, Clone)]
pub struct AgentsConfig {
    pub primary: Endpoint,
    /// Secondary provider used only when the caller allows fallback.
    pub fallback: Option<Endpoint>,
    /// HTTP request timeout.
    pub timeout: Duration,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Roster TOML; the built-in roster is used when absent.
    pub roster_path: Option<PathBuf>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            primary: Endpoint {
                url: std::env::var("EDRR_LLM_URL")
                    .unwrap_or_else(|_| "http://localhost:8080/v1".into()),
                model: std::env::var("EDRR_LLM_MODEL").unwrap_or_else(|_| "default".into()),
                api_key: std::env::var("EDRR_LLM_API_KEY").ok(),
            },
            fallback: Self::fallback_from_env(),
            timeout: Duration::from_secs(
                std::env::var("EDRR_LLM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(120),
            ),
            temperature: 0.3,
            max_tokens: 2048,
            roster_path: std::env::var("EDRR_ROSTER").ok().map(PathBuf::from),
        }
    }
}

impl AgentsConfig {
    fn fallback_from_env() -> Option<Endpoint> {
        let url = std::env::var("EDRR_FALLBACK_URL").ok()?;
        let model = std::env::var("EDRR_FALLBACK_MODEL").unwrap_or_else(|_| "default".into());
        Some(Endpoint {
            url,
            model,
            api_key: std::env::var("EDRR_FALLBACK_API_KEY").ok(),
        })
    }

    /// Endpoints in fallback order.
    pub fn endpoints(&self) -> Vec<&Endpoint> {
        std::iter::once(&self.primary)
            .chain(self.fallback.as_ref())
            .collect()
    }
}
