//! Full EDRR cycles: role rotation, status snapshots, manifests,
//! persistence and degradation, driven end-to-end with scripted agents.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use edrr_coordination::ports::keys;
use edrr_coordination::wsde::{
    AgentBehavior, AgentError, AgentRole, AuditEvent, ProposalDraft, ProposalRequest,
};
use edrr_coordination::{
    AgentKind, CoordinatorError, CycleStatus, CycleWarning, EdrrCoordinator, EdrrEvent,
    Expertise, InMemoryStore, Manifest, OrchestratorConfig, Phase, ReviewStatus, TeamMember,
};
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;

use common::{coordinator, coordinator_with, member, team_with, Broken, Scripted};

/// Remembers every request it was handed.
#[derive(Default)]
struct Recorder {
    requests: Mutex<Vec<ProposalRequest>>,
}

#[async_trait]
impl AgentBehavior for Recorder {
    async fn generate_proposal(
        &self,
        request: &ProposalRequest,
    ) -> Result<ProposalDraft, AgentError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ProposalDraft::new(format!("{} plan", request.phase), 0.9))
    }
}

fn security_members() -> Vec<TeamMember> {
    vec![
        member("a", AgentKind::Designer, Expertise::from([("security", 0.9)]), ""),
        member(
            "b",
            AgentKind::Critic,
            Expertise::from([("security", 0.2), ("performance", 0.95)]),
            "",
        ),
    ]
}

// ── Role rotation ──────────────────────────────────────────────────

#[tokio::test]
async fn test_primus_rotates_with_task() {
    let config = OrchestratorConfig::default();
    let team = team_with(&config, security_members()).await;

    let first = team
        .select_primus(Phase::Expand, &["security".to_string()])
        .await
        .unwrap();
    assert_eq!(first, "a");

    let second = team
        .select_primus(Phase::Expand, &["performance".to_string()])
        .await
        .unwrap();
    assert_eq!(second, "b");

    let agents = team.agents().await;
    let a = agents.iter().find(|x| x.id == "a").unwrap();
    let b = agents.iter().find(|x| x.id == "b").unwrap();
    assert_eq!(a.role, AgentRole::Peer);
    assert_eq!(b.role, AgentRole::Primus);
}

#[tokio::test]
async fn test_cycle_primus_follows_task_tags() {
    let coordinator = coordinator_with(OrchestratorConfig::default(), security_members()).await;
    let handle = coordinator
        .start_cycle(json!({"description": "harden login", "tags": ["security"]}), None)
        .await
        .unwrap();
    let result = coordinator.advance(&handle.id).await.unwrap();
    assert_eq!(result.primus.as_deref(), Some("a"));

    let elected = coordinator
        .audit_trail(&handle.id)
        .await
        .into_iter()
        .filter(|e| matches!(e.event, AuditEvent::PrimusSelected { .. }))
        .count();
    assert_eq!(elected, 1);
}

// ── Status snapshots ───────────────────────────────────────────────

#[tokio::test]
async fn test_status_is_idempotent() {
    let coordinator = coordinator().await;
    let handle = coordinator
        .start_cycle(json!({"description": "write docs"}), None)
        .await
        .unwrap();
    coordinator.advance(&handle.id).await.unwrap();

    let first = coordinator.status(&handle.id).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = coordinator.status(&handle.id).await.unwrap();
    let third = coordinator.status(&handle.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(first.phase, Phase::Differentiate);
}

#[tokio::test]
async fn test_unknown_cycle() {
    let coordinator = coordinator().await;
    assert!(matches!(
        coordinator.status("missing").await,
        Err(CoordinatorError::CycleNotFound(_))
    ));
    assert!(matches!(
        coordinator.advance("missing").await,
        Err(CoordinatorError::CycleNotFound(_))
    ));
}

// ── Payload validation ─────────────────────────────────────────────

#[tokio::test]
async fn test_non_mapping_payload_creates_nothing() {
    let config = OrchestratorConfig::default();
    let memory = Arc::new(InMemoryStore::new());
    let team = team_with(&config, common::default_members()).await;
    let coordinator = EdrrCoordinator::new(config, team, memory.clone());
    let mut events = coordinator.subscribe();

    for bad in [json!(42), json!("task"), json!(["a"]), json!(null)] {
        let err = coordinator.start_cycle(bad, None).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::PayloadType(_)));
    }
    assert!(memory.is_empty().await);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

// ── Full run ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_run_persists_and_publishes() {
    let config = OrchestratorConfig::default();
    let memory = Arc::new(InMemoryStore::new());
    let team = team_with(&config, common::default_members()).await;
    let coordinator = EdrrCoordinator::new(config, team, memory.clone());
    let mut events = coordinator.subscribe();

    let handle = coordinator
        .start_cycle(json!({"description": "build a rate limiter"}), None)
        .await
        .unwrap();
    let snapshot = coordinator.run_to_completion(&handle.id).await.unwrap();
    assert_eq!(snapshot.status, CycleStatus::Completed);
    assert_eq!(snapshot.decisions.len(), 4);
    assert_eq!(snapshot.transitions.len(), 4);
    assert!(snapshot.warnings.is_empty());

    let records = memory.records_for(&handle.id).await;
    let count = |key: &str| records.iter().filter(|r| r.key == key).count();
    assert_eq!(count(keys::TASK), 1);
    assert_eq!(count(keys::PHASE_RESULT), 4);
    assert_eq!(count(keys::COMMUNICATION_HISTORY), 4);
    assert_eq!(count(keys::CYCLE_SUMMARY), 1);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.event_type());
    }
    assert_eq!(
        kinds,
        vec![
            "cycle_started",
            "phase_completed",
            "phase_completed",
            "phase_completed",
            "phase_completed",
            "cycle_completed",
        ]
    );
}

#[tokio::test]
async fn test_refine_decision_is_peer_reviewed() {
    let coordinator = coordinator().await;
    let handle = coordinator
        .start_cycle(json!({"description": "tune queries"}), None)
        .await
        .unwrap();
    coordinator.run_to_completion(&handle.id).await.unwrap();

    let refine = coordinator
        .phase_result(&handle.id, Phase::Refine)
        .await
        .unwrap()
        .unwrap();
    let review = refine.review.expect("refine decisions are reviewed");
    assert_eq!(review.status, ReviewStatus::Approved);
    assert!(!review.reviewers.is_empty());

    let expand = coordinator
        .phase_result(&handle.id, Phase::Expand)
        .await
        .unwrap()
        .unwrap();
    assert!(expand.review.is_none());
}

// ── Manifest ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_manifest_instructions_and_dependencies_reach_agents() {
    let recorder = Arc::new(Recorder::default());
    let members = vec![
        TeamMember::new("rec", AgentKind::Designer, Expertise::new(), recorder.clone()),
        TeamMember::new(
            "other",
            AgentKind::Critic,
            Expertise::new(),
            Arc::new(Scripted::new("other", "alternative", 0.5)),
        ),
    ];
    let coordinator = coordinator_with(OrchestratorConfig::default(), members).await;
    let manifest = Manifest::parse_str(
        r#"
phases:
  refine:
    instructions: "Write the migration plan"
dependencies:
  refine: [expand]
"#,
    )
    .unwrap();
    let handle = coordinator
        .start_with(edrr_coordination::TaskPayload::new("migrate the schema"), manifest)
        .await
        .unwrap();
    coordinator.run_to_completion(&handle.id).await.unwrap();

    let requests = recorder.requests.lock().unwrap().clone();
    let refine = requests
        .iter()
        .find(|r| r.phase == Phase::Refine)
        .expect("recorder was asked during refine");
    assert_eq!(refine.instructions, "Write the migration plan");
    assert!(refine.context.iter().any(|c| c == "expand: expand plan"));
    assert!(refine.context.iter().any(|c| c == "differentiate: differentiate plan"));

    let expand = requests.iter().find(|r| r.phase == Phase::Expand).unwrap();
    assert_eq!(expand.instructions, Phase::Expand.default_instructions());
    assert!(expand.context.is_empty());
}

#[tokio::test]
async fn test_invalid_manifest_rejected() {
    let coordinator = coordinator().await;
    let err = coordinator
        .start_cycle(
            json!({"description": "x"}),
            Some(json!({"dependencies": {"expand": ["refine"]}})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidManifest(_)));
}

// ── Degradation ────────────────────────────────────────────────────

#[tokio::test]
async fn test_silent_team_degrades_but_completes() {
    let members = vec![
        TeamMember::new("x", AgentKind::Worker, Expertise::new(), Arc::new(Broken)),
        TeamMember::new("y", AgentKind::Worker, Expertise::new(), Arc::new(Broken)),
    ];
    let coordinator = coordinator_with(OrchestratorConfig::default(), members).await;
    let handle = coordinator
        .start_cycle(json!({"description": "anything"}), None)
        .await
        .unwrap();

    let result = coordinator.advance(&handle.id).await.unwrap();
    assert!(result.degraded);
    assert!(result.consensus.is_none());
    assert_eq!(result.proposals.len(), 2);
    assert!(result.proposals.iter().all(|p| !p.is_response()));

    let snapshot = coordinator.run_to_completion(&handle.id).await.unwrap();
    assert_eq!(snapshot.status, CycleStatus::Completed);
    let no_response = snapshot
        .warnings
        .iter()
        .filter(|w| matches!(w, CycleWarning::NoResponse { .. }))
        .count();
    assert_eq!(no_response, 8);
    assert!(snapshot
        .warnings
        .iter()
        .any(|w| matches!(w, CycleWarning::Degraded { phase: Phase::Expand, .. })));
}

#[tokio::test]
async fn test_failed_cycle_publishes_event() {
    let config = OrchestratorConfig::default();
    let team = edrr_coordination::WsdeTeam::new(edrr_coordination::TeamConfig::from(&config))
        .shared();
    let coordinator = EdrrCoordinator::new(config, team, Arc::new(InMemoryStore::new()));
    let mut events = coordinator.subscribe();
    let handle = coordinator
        .start_cycle(json!({"description": "no team"}), None)
        .await
        .unwrap();

    let err = coordinator.advance(&handle.id).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::PhaseFailed { .. }));
    assert!(err.to_string().contains(&handle.id));

    let _started = events.recv().await.unwrap();
    match events.recv().await.unwrap() {
        EdrrEvent::CycleFailed { cycle_id, phase, .. } => {
            assert_eq!(cycle_id, handle.id);
            assert_eq!(phase, Phase::Expand);
        }
        other => panic!("unexpected event {other:?}"),
    }
    let again = coordinator.advance(&handle.id).await.unwrap_err();
    assert!(matches!(
        again,
        CoordinatorError::CycleNotRunning {
            status: CycleStatus::Failed,
            ..
        }
    ));
}
