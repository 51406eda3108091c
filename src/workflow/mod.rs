//! Incident workflow state machine.
//!
//! ```text
//! capture:  draft ──edit──▶ in_progress ──finalize──▶ completed
//! overall:  capture_pending ──finalize──▶ ready_for_analysis ──complete──▶ completed
//! analysis: not_started ──start──▶ in_progress ──complete──▶ completed
//! ```
//!
//! Transitions only move forward. A completed capture rejects every further
//! phase edit or clarification mutation with `WorkflowClosed`.

use chrono::{DateTime, Utc};
use narrate_common::{AnalysisStatus, CaptureStatus, Incident, NarrativePhase, OverallStatus};
use serde::Serialize;
use tracing::info;

use crate::db::{DbHandle, Store};
use crate::errors::NarrateError;

/// The three status fields of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WorkflowState {
    pub capture: CaptureStatus,
    pub overall: OverallStatus,
    pub analysis: AnalysisStatus,
}

impl From<&Incident> for WorkflowState {
    fn from(incident: &Incident) -> Self {
        Self {
            capture: incident.capture_status,
            overall: incident.overall_status,
            analysis: incident.analysis_status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowEvent {
    PhaseEdited,
    CaptureFinalized,
    AnalysisStarted,
    AnalysisCompleted,
}

impl WorkflowEvent {
    fn describe(&self) -> &'static str {
        match self {
            Self::PhaseEdited => "edit narrative",
            Self::CaptureFinalized => "finalize capture",
            Self::AnalysisStarted => "start analysis",
            Self::AnalysisCompleted => "complete analysis",
        }
    }
}

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Closed,
    Invalid(String),
}

impl Rejection {
    pub fn into_error(self, incident_id: &str) -> NarrateError {
        match self {
            Self::Closed => NarrateError::WorkflowClosed {
                incident_id: incident_id.to_string(),
            },
            Self::Invalid(msg) => NarrateError::Validation(msg),
        }
    }
}

impl WorkflowState {
    /// The state after `event`, or why the event is not allowed here.
    pub fn apply(&self, event: WorkflowEvent) -> Result<WorkflowState, Rejection> {
        let invalid = || {
            Rejection::Invalid(format!(
                "Cannot {} while capture is {}, overall is {} and analysis is {}",
                event.describe(),
                self.capture,
                self.overall,
                self.analysis
            ))
        };

        match event {
            WorkflowEvent::PhaseEdited => match self.capture {
                CaptureStatus::Draft => Ok(WorkflowState {
                    capture: CaptureStatus::InProgress,
                    ..*self
                }),
                CaptureStatus::InProgress => Ok(*self),
                CaptureStatus::Completed => Err(Rejection::Closed),
            },
            WorkflowEvent::CaptureFinalized => match self.capture {
                CaptureStatus::InProgress => Ok(WorkflowState {
                    capture: CaptureStatus::Completed,
                    overall: OverallStatus::ReadyForAnalysis,
                    ..*self
                }),
                _ => Err(invalid()),
            },
            WorkflowEvent::AnalysisStarted => {
                if self.overall == OverallStatus::ReadyForAnalysis
                    && self.analysis == AnalysisStatus::NotStarted
                {
                    Ok(WorkflowState {
                        analysis: AnalysisStatus::InProgress,
                        ..*self
                    })
                } else {
                    Err(invalid())
                }
            }
            WorkflowEvent::AnalysisCompleted => match self.analysis {
                AnalysisStatus::InProgress => Ok(WorkflowState {
                    analysis: AnalysisStatus::Completed,
                    overall: OverallStatus::Completed,
                    ..*self
                }),
                _ => Err(invalid()),
            },
        }
    }
}

/// Fail with `WorkflowClosed` once capture is completed.
pub fn ensure_open(incident: &Incident) -> Result<(), NarrateError> {
    if incident.capture_status.is_closed() {
        return Err(NarrateError::WorkflowClosed {
            incident_id: incident.id.clone(),
        });
    }
    Ok(())
}

/// Load an incident or fail with `NotFound`.
pub(crate) fn load_incident(store: &Store, incident_id: &str) -> Result<Incident, NarrateError> {
    store
        .get_incident(incident_id)?
        .ok_or_else(|| NarrateError::not_found("Incident", incident_id))
}

/// Apply `event` to a stored incident. Writes only when the state changes.
///
/// Runs on the caller's connection so it can join a surrounding transaction.
pub(crate) fn apply_event(
    store: &Store,
    incident: &Incident,
    event: WorkflowEvent,
) -> Result<WorkflowState, NarrateError> {
    let current = WorkflowState::from(incident);
    let next = current
        .apply(event)
        .map_err(|r| r.into_error(&incident.id))?;
    if next != current {
        store.update_incident_status(&incident.id, next.capture, next.overall, next.analysis)?;
        info!(
            incident_id = %incident.id,
            from = ?current,
            to = ?next,
            "workflow transition"
        );
    }
    Ok(next)
}

/// Bump a phase's answer counter and timestamp.
pub(crate) fn record_answer_progress(
    store: &Store,
    incident_id: &str,
    phase: NarrativePhase,
    at: DateTime<Utc>,
) -> Result<(), NarrateError> {
    store.record_phase_answer(incident_id, phase, at)?;
    Ok(())
}

/// Async entry to the lifecycle actions.
#[derive(Clone)]
pub struct Workflow {
    db: DbHandle,
}

impl Workflow {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub async fn finalize_capture(&self, incident_id: &str) -> Result<Incident, NarrateError> {
        self.transition(incident_id, WorkflowEvent::CaptureFinalized)
            .await
    }

    pub async fn start_analysis(&self, incident_id: &str) -> Result<Incident, NarrateError> {
        self.transition(incident_id, WorkflowEvent::AnalysisStarted)
            .await
    }

    pub async fn complete_analysis(&self, incident_id: &str) -> Result<Incident, NarrateError> {
        self.transition(incident_id, WorkflowEvent::AnalysisCompleted)
            .await
    }

    async fn transition(
        &self,
        incident_id: &str,
        event: WorkflowEvent,
    ) -> Result<Incident, NarrateError> {
        let id = incident_id.to_string();
        self.db
            .call(move |store| {
                let incident = load_incident(store, &id)?;
                apply_event(store, &incident, event)?;
                load_incident(store, &id)
            })
            .await
    }
}
