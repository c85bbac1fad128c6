//! LLM-backed implementation of the agent capability interface.
//!
//! One struct serves every agent kind: the kind selects the system prompt
//! and which capabilities are allowed. Model output is parsed tolerantly.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use edrr_coordination::consensus::Proposal;
use edrr_coordination::dialectic::{CritiqueCategory, SynthesisRequest};
use edrr_coordination::wsde::{
    AgentBehavior, AgentError, Capability, CriterionResult, ProposalDraft, ProposalRequest,
    ReviewFeedback, ReviewVerdict,
};
use edrr_coordination::{AgentKind, LlmPort};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::prompts;

/// Confidence used when the model does not state one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

static CONFIDENCE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*\**confidence\**\s*[:=]\s*([0-9]*\.?[0-9]+)\s*(%)?\s*$").unwrap()
});

static JSON_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

static VERDICT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*[-*]?\s*([a-z_ ]+?)\s*[:=]\s*(pass|fail|yes|no|true|false|accepted|rejected)\b")
        .unwrap()
});

/// Agent that answers through an [`LlmPort`].
pub struct LlmAgent {
    kind: AgentKind,
    llm: Arc<dyn LlmPort>,
    /// Allow the port to fall back to a secondary provider.
    fallback_allowed: bool,
}

impl LlmAgent {
    pub fn new(kind: AgentKind, llm: Arc<dyn LlmPort>) -> Self {
        Self {
            kind,
            llm,
            fallback_allowed: true,
        }
    }

    pub fn without_fallback(mut self) -> Self {
        self.fallback_allowed = false;
        self
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    fn require(&self, capability: Capability) -> Result<(), AgentError> {
        if self.kind.can(capability) {
            Ok(())
        } else {
            Err(AgentError::Unsupported(capability))
        }
    }

    async fn ask(&self, prompt: &str) -> Result<String, AgentError> {
        let reply = self
            .llm
            .complete(prompt, prompts::system_prompt(self.kind), self.fallback_allowed)
            .await?;
        debug!(
            kind = %self.kind,
            prompt_version = prompts::PROMPT_VERSION,
            chars = reply.len(),
            "Agent reply"
        );
        Ok(reply)
    }
}

#[async_trait]
impl AgentBehavior for LlmAgent {
    async fn generate_proposal(
        &self,
        request: &ProposalRequest,
    ) -> Result<ProposalDraft, AgentError> {
        self.require(Capability::GenerateProposal)?;
        let reply = self.ask(&prompts::proposal_prompt(request)).await?;
        let (content, confidence) = split_confidence(&reply);
        if content.is_empty() {
            return Err(AgentError::Malformed("empty proposal".into()));
        }
        Ok(ProposalDraft::new(content, confidence))
    }

    async fn critique(
        &self,
        thesis: &str,
        category: CritiqueCategory,
    ) -> Result<String, AgentError> {
        self.require(Capability::Critique)?;
        let reply = self.ask(&prompts::critique_prompt(thesis, category)).await?;
        let text = reply.trim();
        if text.is_empty() {
            return Err(AgentError::Malformed("empty critique".into()));
        }
        Ok(text.to_string())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String, AgentError> {
        let reply = self.ask(&prompts::synthesis_prompt(request)).await?;
        let text = reply.trim();
        if text.is_empty() {
            Ok(request.compose())
        } else {
            Ok(text.to_string())
        }
    }

    async fn review(
        &self,
        proposal: &Proposal,
        criteria: &[String],
    ) -> Result<ReviewVerdict, AgentError> {
        self.require(Capability::Review)?;
        let reply = self.ask(&prompts::review_prompt(proposal, criteria)).await?;
        parse_verdict(&reply, criteria)
    }

    async fn revise(
        &self,
        proposal: &Proposal,
        feedback: &[ReviewFeedback],
    ) -> Result<ProposalDraft, AgentError> {
        let reply = self.ask(&prompts::revise_prompt(proposal, feedback)).await?;
        let (content, confidence) = split_confidence(&reply);
        if content.is_empty() {
            return Err(AgentError::Malformed("empty revision".into()));
        }
        Ok(ProposalDraft::new(content, confidence))
    }
}

/// Strip the `CONFIDENCE:` line and return it clamped to `[0, 1]`.
///
/// Percentages and values above 1 are read as percent. Missing or
/// unparseable confidence falls back to [`DEFAULT_CONFIDENCE`].
pub fn split_confidence(reply: &str) -> (String, f64) {
    let Some(caps) = CONFIDENCE_LINE.captures_iter(reply).last() else {
        return (reply.trim().to_string(), DEFAULT_CONFIDENCE);
    };
    let confidence = caps[1]
        .parse::<f64>()
        .map(|v| {
            if caps.get(2).is_some() || v > 1.0 {
                v / 100.0
            } else {
                v
            }
        })
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE);

    let whole = caps.get(0).map_or(0..0, |m| m.range());
    let mut content = String::with_capacity(reply.len());
    content.push_str(&reply[..whole.start]);
    content.push_str(&reply[whole.end..]);
    (content.trim().to_string(), confidence)
}

/// Parse a review verdict.
///
/// Accepts the requested JSON (possibly wrapped in prose or a code fence),
/// then `criterion: pass|fail` lines, then a bare approve/reject word
/// applied to every criterion. Criteria the model skipped count as accepted.
pub fn parse_verdict(reply: &str, criteria: &[String]) -> Result<ReviewVerdict, AgentError> {
    if let Some(verdict) = json_verdict(reply, criteria) {
        return Ok(verdict);
    }

    let mut by_line = std::collections::HashMap::new();
    for caps in VERDICT_LINE.captures_iter(reply) {
        let name = caps[1].trim().to_lowercase();
        let accepted = matches!(
            caps[2].to_lowercase().as_str(),
            "pass" | "yes" | "true" | "accepted"
        );
        by_line.insert(name, accepted);
    }
    if !by_line.is_empty() {
        return Ok(ReviewVerdict {
            criteria: criteria
                .iter()
                .map(|c| {
                    CriterionResult::new(c, by_line.get(&c.to_lowercase()).copied().unwrap_or(true))
                })
                .collect(),
            critique: reply.trim().to_string(),
        });
    }

    let lower = reply.to_lowercase();
    let overall = if lower.contains("reject") || lower.contains("request changes") {
        false
    } else if lower.contains("approve") || lower.contains("lgtm") {
        true
    } else {
        warn!(chars = reply.len(), "Unparseable review verdict");
        return Err(AgentError::Malformed("review verdict not understood".into()));
    };
    Ok(ReviewVerdict {
        criteria: criteria
            .iter()
            .map(|c| CriterionResult::new(c, overall))
            .collect(),
        critique: reply.trim().to_string(),
    })
}

fn json_verdict(reply: &str, criteria: &[String]) -> Option<ReviewVerdict> {
    let raw = JSON_OBJECT.find(reply)?.as_str();
    let value: Value = serde_json::from_str(raw).ok()?;
    let verdicts = value.get("criteria")?;

    let lookup = |name: &str| -> Option<bool> {
        match verdicts {
            Value::Object(map) => map
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .and_then(|(_, v)| accepted_value(v)),
            Value::Array(items) => items.iter().find_map(|item| {
                let criterion = item.get("criterion")?.as_str()?;
                if criterion.eq_ignore_ascii_case(name) {
                    accepted_value(item.get("accepted")?)
                } else {
                    None
                }
            }),
            _ => None,
        }
    };

    Some(ReviewVerdict {
        criteria: criteria
            .iter()
            .map(|c| CriterionResult::new(c, lookup(c).unwrap_or(true)))
            .collect(),
        critique: value
            .get("critique")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn accepted_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "pass" | "yes" | "true" | "accepted" => Some(true),
            "fail" | "no" | "false" | "rejected" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
