//! Cycle manifests.
//!
//! A manifest is an optional YAML or JSON mapping consumed once when a
//! cycle starts. Only the recognised keys are accepted; anything else is an
//! error, and validation finishes before the manifest is attached to a
//! cycle, so a bad manifest never partially applies.
//!
//! ```yaml
//! id: auth-hardening
//! phases:
//!   expand:
//!     instructions: "List every entry point that touches credentials"
//!     templates: [threat-model]
//!   refine:
//!     instructions: "Produce a patch plan"
//! dependencies:
//!   refine: [expand]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edrr::Phase;
use crate::payload::value_kind;

/// Error type for manifest parsing and validation
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Manifest must be a mapping, got {0}")]
    NotAMapping(&'static str),

    #[error("Manifest is malformed: {0}")]
    Malformed(String),

    #[error("Manifest phase '{0}' is not a working phase")]
    UnknownPhase(Phase),

    #[error("Phase '{phase}' has empty instructions")]
    EmptyInstructions { phase: Phase },

    #[error("Phase '{phase}' cannot depend on '{on}': dependencies must run earlier")]
    InvalidDependency { phase: Phase, on: Phase },

    #[error("Failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for manifest operations
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Per-phase instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseInstructions {
    /// Instructions passed to agents during delegation.
    pub instructions: String,
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// A validated manifest.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub phases: BTreeMap<Phase, PhaseInstructions>,
    /// Extra ordering constraints, keyed by the dependent phase.
    #[serde(default)]
    pub dependencies: BTreeMap<Phase, Vec<Phase>>,
}

impl Manifest {
    /// Parse a manifest from YAML or JSON text.
    pub fn parse_str(input: &str) -> ManifestResult<Self> {
        let value: Value =
            serde_yaml::from_str(input).map_err(|e| ManifestError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Load a manifest file (YAML or JSON).
    pub fn load(path: &Path) -> ManifestResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse_str(&raw)
    }

    /// Validate an untyped value as a manifest.
    pub fn from_value(value: Value) -> ManifestResult<Self> {
        if !value.is_object() {
            return Err(ManifestError::NotAMapping(value_kind(&value)));
        }
        let manifest: Manifest =
            serde_json::from_value(value).map_err(|e| ManifestError::Malformed(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> ManifestResult<()> {
        for (phase, instructions) in &self.phases {
            if phase.is_terminal() {
                return Err(ManifestError::UnknownPhase(*phase));
            }
            if instructions.instructions.trim().is_empty() {
                return Err(ManifestError::EmptyInstructions { phase: *phase });
            }
        }
        for (phase, deps) in &self.dependencies {
            if phase.is_terminal() {
                return Err(ManifestError::UnknownPhase(*phase));
            }
            for on in deps {
                if on.ordinal() >= phase.ordinal() {
                    return Err(ManifestError::InvalidDependency {
                        phase: *phase,
                        on: *on,
                    });
                }
            }
        }
        Ok(())
    }

    /// Instructions for a phase, if the manifest provides them.
    pub fn instructions_for(&self, phase: Phase) -> Option<&PhaseInstructions> {
        self.phases.get(&phase)
    }

    /// Phases whose results must exist before `phase` may run.
    ///
    /// Always includes the immediately preceding phase.
    pub fn dependencies_of(&self, phase: Phase) -> Vec<Phase> {
        let mut deps: Vec<Phase> = phase.previous().into_iter().collect();
        if let Some(extra) = self.dependencies.get(&phase) {
            for dep in extra {
                if !deps.contains(dep) {
                    deps.push(*dep);
                }
            }
        }
        deps.sort();
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_yaml_manifest() {
        let manifest = Manifest::parse_str(
            r#"
id: demo
phases:
  expand:
    instructions: "Brainstorm"
    templates: [outline]
  refine:
    instructions: "Polish"
dependencies:
  refine: [expand]
"#,
        )
        .unwrap();

        assert_eq!(manifest.id.as_deref(), Some("demo"));
        assert_eq!(
            manifest.instructions_for(Phase::Expand).unwrap().templates,
            vec!["outline"]
        );
        assert!(manifest.instructions_for(Phase::Differentiate).is_none());
        assert_eq!(
            manifest.dependencies_of(Phase::Refine),
            vec![Phase::Expand, Phase::Differentiate]
        );
    }

    #[test]
    fn test_parse_json_manifest() {
        let manifest =
            Manifest::parse_str(r#"{"phases": {"retrospect": {"instructions": "Reflect"}}}"#)
                .unwrap();
        assert_eq!(
            manifest
                .instructions_for(Phase::Retrospect)
                .map(|p| p.instructions.as_str()),
            Some("Reflect")
        );
    }

    #[test]
    fn test_non_mapping_rejected() {
        let err = Manifest::from_value(json!(["expand", "refine"])).unwrap_err();
        assert!(matches!(err, ManifestError::NotAMapping("a list")));

        let err = Manifest::parse_str("- just\n- a list\n").unwrap_err();
        assert!(matches!(err, ManifestError::NotAMapping(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Manifest::from_value(json!({"phasez": {}})).unwrap_err();
        assert!(matches!(err, ManifestError::Malformed(_)));
    }

    #[test]
    fn test_missing_instructions_rejected() {
        let err = Manifest::from_value(json!({"phases": {"expand": {"templates": []}}}))
            .unwrap_err();
        assert!(matches!(err, ManifestError::Malformed(_)));

        let err = Manifest::from_value(json!({"phases": {"expand": {"instructions": "  "}}}))
            .unwrap_err();
        assert!(matches!(
            err,
            ManifestError::EmptyInstructions {
                phase: Phase::Expand
            }
        ));
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let err = Manifest::from_value(json!({"dependencies": {"expand": ["refine"]}}))
            .unwrap_err();
        assert!(matches!(
            err,
            ManifestError::InvalidDependency {
                phase: Phase::Expand,
                on: Phase::Refine
            }
        ));
    }

    #[test]
    fn test_completed_phase_rejected() {
        let err = Manifest::from_value(json!({"phases": {"completed": {"instructions": "x"}}}))
            .unwrap_err();
        assert!(matches!(err, ManifestError::UnknownPhase(Phase::Completed)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.yaml");
        std::fs::write(&path, "phases:\n  expand:\n    instructions: go wide\n").unwrap();
        let manifest = Manifest::load(&path).unwrap();
        assert!(manifest.instructions_for(Phase::Expand).is_some());
    }
}
