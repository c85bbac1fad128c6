//! LLM-backed agents for the EDRR coordinator.
//!
//! - `agent`: one [`AgentBehavior`](edrr_coordination::AgentBehavior)
//!   implementation for every agent kind, prompting through the LLM port
//! - `llm`: OpenAI-compatible HTTP client and a provider fallback chain
//! - `roster`: team composition from TOML or the built-in roster
//! - `config`: endpoint configuration from `EDRR_*` environment variables

pub mod agent;
pub mod config;
pub mod llm;
pub mod prompts;
pub mod roster;

pub use agent::LlmAgent;
pub use config::{AgentsConfig, Endpoint};
pub use llm::{FallbackLlm, OpenAiCompatClient};
pub use roster::{Roster, RosterError};
