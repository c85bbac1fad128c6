//! Dialectical reasoning: thesis, antithesis, synthesis, evaluation.
//!
//! Used to resolve tied consensus rounds: the two leading proposals become
//! thesis and antithesis, and the synthesis becomes the decision.

pub mod critique;
pub mod reasoner;
pub mod record;

pub use critique::{
    conflicts, reconcile, Critique, CritiqueCategory, CritiqueSource, Reconciliation,
    CONFLICTING_PAIRS,
};
pub use reasoner::{
    DialecticalReasoner, GuardOutcome, ReasoningError, ReasoningGuard, ReasoningResult,
    SynthesisPart, SynthesisRequest,
};
pub use record::{CategoryScore, DialecticalRecord, Evaluation, Synthesis, Thesis};
