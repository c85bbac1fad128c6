//! LLM-backed agents driven by a scripted LLM port (no network).
//!
//! Covers: prompt → reply parsing for every capability, capability checks
//! per agent kind, and a full EDRR cycle with a built-in roster.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use edrr_agents::{LlmAgent, Roster};
use edrr_coordination::consensus::Proposal;
use edrr_coordination::dialectic::CritiqueCategory;
use edrr_coordination::wsde::{AgentBehavior, AgentError, AgentRole, Capability, ProposalRequest};
use edrr_coordination::{
    AgentKind, CycleStatus, EdrrCoordinator, InMemoryStore, LlmError, LlmPort,
    OrchestratorConfig, Phase, ReviewStatus, TaskPayload, TeamConfig, WsdeTeam,
};
use serde_json::json;

/// Answers by prompt shape and records every call.
#[derive(Default)]
struct ScriptedLlm {
    calls: Mutex<Vec<(String, bool)>>,
}

impl ScriptedLlm {
    fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmPort for ScriptedLlm {
    async fn complete(
        &self,
        prompt: &str,
        _system_prompt: &str,
        fallback_allowed: bool,
    ) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), fallback_allowed));
        let reply = if prompt.contains("Respond with JSON only") {
            r#"{"criteria": {"correctness": true, "completeness": true, "clarity": true, "risk": "pass"}, "critique": "fine"}"#
                .to_string()
        } else if prompt.contains("Critique the following") {
            "The token endpoint lacks rate limiting.".to_string()
        } else if prompt.contains("Merge two") {
            "Merged plan".to_string()
        } else if prompt.contains("Revise your proposal") {
            "Revised plan\nCONFIDENCE: 0.9".to_string()
        } else {
            "Use exponential backoff with jitter.\n\nCONFIDENCE: 0.8".to_string()
        };
        Ok(reply)
    }
}

/// Always down.
struct DownLlm;

#[async_trait]
impl LlmPort for DownLlm {
    async fn complete(&self, _: &str, _: &str, _: bool) -> Result<String, LlmError> {
        Err(LlmError::Unavailable("offline".into()))
    }
}

fn request() -> ProposalRequest {
    ProposalRequest {
        cycle_id: "c1".into(),
        phase: Phase::Expand,
        depth: 0,
        task: TaskPayload::new("Add retries to the client"),
        instructions: Phase::Expand.default_instructions().into(),
        role: AgentRole::Primus,
        context: Vec::new(),
        messages: Vec::new(),
    }
}

// ── Capabilities ───────────────────────────────────────────────────

#[tokio::test]
async fn test_proposal_confidence_parsed() {
    let llm = Arc::new(ScriptedLlm::default());
    let agent = LlmAgent::new(AgentKind::Designer, llm.clone());

    let draft = agent.generate_proposal(&request()).await.unwrap();
    assert_eq!(draft.content, "Use exponential backoff with jitter.");
    assert!((draft.confidence - 0.8).abs() < 1e-9);

    let calls = llm.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.contains("Add retries to the client"));
    assert!(calls[0].1, "fallback allowed by default");
}

#[tokio::test]
async fn test_without_fallback_is_forwarded() {
    let llm = Arc::new(ScriptedLlm::default());
    let agent = LlmAgent::new(AgentKind::Worker, llm.clone()).without_fallback();
    agent.generate_proposal(&request()).await.unwrap();
    assert!(!llm.calls()[0].1);
}

#[tokio::test]
async fn test_worker_cannot_critique_or_review() {
    let llm = Arc::new(ScriptedLlm::default());
    let worker = LlmAgent::new(AgentKind::Worker, llm.clone());

    let critique = worker.critique("plan", CritiqueCategory::Security).await;
    assert!(matches!(
        critique,
        Err(AgentError::Unsupported(Capability::Critique))
    ));
    let proposal = Proposal::submitted("w", "c1", Phase::Refine, "plan", 0.5);
    let review = worker.review(&proposal, &["clarity".into()]).await;
    assert!(matches!(review, Err(AgentError::Unsupported(Capability::Review))));
    assert!(llm.calls().is_empty());
}

#[tokio::test]
async fn test_critic_critique_and_review() {
    let llm = Arc::new(ScriptedLlm::default());
    let critic = LlmAgent::new(AgentKind::Critic, llm);

    let text = critic
        .critique("Issue tokens", CritiqueCategory::Security)
        .await
        .unwrap();
    assert!(text.contains("rate limiting"));

    let proposal = Proposal::submitted("d", "c1", Phase::Refine, "plan", 0.5);
    let criteria: Vec<String> = vec!["correctness".into(), "risk".into()];
    let verdict = critic.review(&proposal, &criteria).await.unwrap();
    assert!(verdict.criteria.iter().all(|c| c.accepted));
    assert_eq!(verdict.critique, "fine");
}

#[tokio::test]
async fn test_llm_failure_surfaces_as_agent_error() {
    let agent = LlmAgent::new(AgentKind::Designer, Arc::new(DownLlm));
    let err = agent.generate_proposal(&request()).await.unwrap_err();
    assert!(matches!(err, AgentError::Llm(LlmError::Unavailable(_))));
}

// ── Full cycle ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_builtin_roster_runs_full_cycle() {
    let llm = Arc::new(ScriptedLlm::default());
    let config = OrchestratorConfig::default();
    let team = WsdeTeam::new(TeamConfig::from(&config)).shared();
    team.configure_team(Roster::builtin().into_members(llm.clone()))
        .await
        .unwrap();
    let coordinator = EdrrCoordinator::new(config, team, Arc::new(InMemoryStore::new()));

    let handle = coordinator
        .start_cycle(json!({"description": "Harden the login flow", "tags": ["security"]}), None)
        .await
        .unwrap();
    let snapshot = coordinator.run_to_completion(&handle.id).await.unwrap();

    assert_eq!(snapshot.status, CycleStatus::Completed);
    assert_eq!(snapshot.decisions.len(), 4);
    assert_eq!(
        snapshot.decisions.get(&Phase::Expand).map(String::as_str),
        Some("Use exponential backoff with jitter.")
    );

    let refine = coordinator
        .phase_result(&handle.id, Phase::Refine)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        refine.review.map(|r| r.status),
        Some(ReviewStatus::Approved)
    );
    assert!(llm
        .calls()
        .iter()
        .any(|(prompt, _)| prompt.contains("Respond with JSON only")));
}
