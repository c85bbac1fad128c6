//! `edrr` command-line front end.
//!
//! ```bash
//! # Run one task through a full EDRR cycle
//! edrr run --task "Design a rate limiter" --tag network --max-depth 2
//!
//! # Check a manifest without running anything
//! edrr validate-manifest ./manifest.yaml
//!
//! # Print the effective orchestrator configuration
//! edrr show-config --config ./edrr.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edrr_agents::{AgentsConfig, FallbackLlm, Roster};
use edrr_coordination::events::EventFilter;
use edrr_coordination::{
    EdrrCoordinator, EdrrEvent, EventBus, InMemoryStore, Manifest, OrchestratorConfig,
    TaskPayload, TeamConfig, WsdeTeam,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "edrr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a task through a full EDRR cycle and print the final snapshot.
    Run {
        /// Task description.
        #[arg(long)]
        task: String,

        /// Task tags used for Primus selection (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Manifest file (YAML or JSON).
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Orchestrator config (TOML).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Roster file (TOML); the built-in roster is used otherwise.
        #[arg(long)]
        roster: Option<PathBuf>,

        /// Override the maximum micro-cycle depth.
        #[arg(long)]
        max_depth: Option<u32>,
    },

    /// Validate a manifest file.
    ValidateManifest {
        path: PathBuf,
    },

    /// Print the effective orchestrator configuration as TOML.
    ShowConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            task,
            tags,
            manifest,
            config,
            roster,
            max_depth,
        } => run(task, tags, manifest, config, roster, max_depth).await,
        Command::ValidateManifest { path } => {
            let manifest = Manifest::load(&path)
                .with_context(|| format!("Invalid manifest {}", path.display()))?;
            println!(
                "{}: ok ({} phase overrides, {} dependency rules)",
                path.display(),
                manifest.phases.len(),
                manifest.dependencies.len()
            );
            Ok(())
        }
        Command::ShowConfig { config } => {
            let config = load_config(config.as_deref())?;
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to render config")?
            );
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    match path {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            let config = OrchestratorConfig::from_env();
            config.validate().context("Invalid environment config")?;
            Ok(config)
        }
    }
}

async fn run(
    task: String,
    tags: Vec<String>,
    manifest: Option<PathBuf>,
    config: Option<PathBuf>,
    roster: Option<PathBuf>,
    max_depth: Option<u32>,
) -> Result<()> {
    let mut config = load_config(config.as_deref())?;
    if let Some(depth) = max_depth {
        config.max_recursion_depth = depth;
    }
    let manifest = match manifest {
        Some(path) => Manifest::load(&path)
            .with_context(|| format!("Invalid manifest {}", path.display()))?,
        None => Manifest::default(),
    };

    let agents_config = AgentsConfig::default();
    let llm = FallbackLlm::from_config(&agents_config).context("Failed to build LLM clients")?;
    let roster = match roster.or_else(|| agents_config.roster_path.clone()) {
        Some(path) => Roster::load(&path)
            .with_context(|| format!("Failed to load roster {}", path.display()))?,
        None => Roster::builtin(),
    };
    info!(
        primary = %agents_config.primary.url,
        model = %agents_config.primary.model,
        fallback = agents_config.fallback.is_some(),
        agents = roster.agents.len(),
        max_depth = config.max_recursion_depth,
        "EDRR run starting"
    );

    let team = WsdeTeam::new(TeamConfig::from(&config)).shared();
    team.configure_team(roster.into_members(Arc::new(llm)))
        .await
        .context("Failed to configure team")?;

    let events = EventBus::new().shared();
    let mut progress =
        events.subscribe_filtered(EventFilter::new().types(vec!["phase_completed"]));
    tokio::spawn(async move {
        while let Some(event) = progress.recv().await {
            if let EdrrEvent::PhaseCompleted {
                phase,
                next,
                duration_ms,
                degraded,
                ..
            } = event
            {
                info!(%phase, %next, duration_ms, degraded, "Phase done");
            }
        }
    });

    let coordinator = EdrrCoordinator::new(config, team, Arc::new(InMemoryStore::new()))
        .with_events(events);
    let payload = tags
        .into_iter()
        .fold(TaskPayload::new(task), |p, tag| p.with_tag(tag));
    let handle = coordinator
        .start_with(payload, manifest)
        .await
        .context("Failed to start cycle")?;
    let snapshot = coordinator
        .run_to_completion(&handle.id)
        .await
        .context("Cycle failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("Failed to render snapshot")?
    );
    Ok(())
}
