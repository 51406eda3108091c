//! Shared domain types for the narrate incident capture engine.
//!
//! Everything here is plain data: phases, workflow statuses, lifecycle tags
//! and the persisted records. Behavior lives in the `narrate` crate.

pub mod auth;
pub mod phase;
pub mod records;
pub mod status;

pub use auth::{Actor, Capability, ResourceContext};
pub use phase::{NarrativePhase, PhaseEdits, PhaseTexts};
pub use records::{
    AnsweredQuestion, ClarificationAnswer, ClarificationQuestion, Incident, Narrative,
    NewIncident, PhaseProgress, PromptTemplate, QuestionProvenance, TemplateStats,
};
pub use status::{AnalysisStatus, CaptureStatus, Lifecycle, OverallStatus};

/// A string did not name any variant of a domain enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
