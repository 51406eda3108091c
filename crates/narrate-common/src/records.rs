use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::{NarrativePhase, PhaseTexts};
use crate::status::{AnalysisStatus, CaptureStatus, Lifecycle, OverallStatus};

/// Fields supplied when an incident is registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIncident {
    pub id: String,
    pub company_id: String,
    pub participant_name: String,
    pub reporter_name: String,
    #[serde(default)]
    pub location: String,
    pub event_at: DateTime<Utc>,
}

/// Per-phase answer activity, the progress signal recorded by the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub phase: NarrativePhase,
    pub answers_submitted: i64,
    pub last_answer_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub company_id: String,
    pub participant_name: String,
    pub reporter_name: String,
    pub location: String,
    pub event_at: DateTime<Utc>,
    pub capture_status: CaptureStatus,
    pub overall_status: OverallStatus,
    pub analysis_status: AnalysisStatus,
    pub narrative_id: Option<String>,
    #[serde(default)]
    pub progress: Vec<PhaseProgress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narrative {
    pub id: String,
    pub incident_id: String,
    pub phases: PhaseTexts,
    pub enhanced: PhaseTexts,
    /// Memoized consolidation of the original phase texts.
    pub consolidated_text: Option<String>,
    /// Memoized original-plus-enhanced merge.
    pub merged_text: Option<String>,
    pub content_fingerprint: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub enhanced_at: Option<DateTime<Utc>>,
}

/// How a question came to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionProvenance {
    pub model_id: String,
    pub template_name: String,
    pub template_version: i64,
    pub ai_backed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    pub incident_id: String,
    pub phase: NarrativePhase,
    pub question_id: String,
    pub question_text: String,
    pub question_order: i64,
    pub generation_id: String,
    pub provenance: QuestionProvenance,
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationAnswer {
    pub incident_id: String,
    pub phase: NarrativePhase,
    pub question_id: String,
    pub answer_text: String,
    pub character_count: i64,
    pub word_count: i64,
    pub is_complete: bool,
    pub answered_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A question together with its answer, if one has been submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnsweredQuestion {
    #[serde(flatten)]
    pub question: ClarificationQuestion,
    pub answer: Option<ClarificationAnswer>,
}

/// Rolling usage statistics for one template version.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplateStats {
    pub usage_count: i64,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: i64,
    pub name: String,
    pub subsystem: String,
    pub version: i64,
    pub body: String,
    pub model_hint: Option<String>,
    pub lifecycle: Lifecycle,
    pub stats: TemplateStats,
    pub created_at: DateTime<Utc>,
}
