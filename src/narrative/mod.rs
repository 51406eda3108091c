//! Per-incident narrative text: lazy creation, phase edits, consolidation.

use anyhow::Context;
use chrono::Utc;
use narrate_common::{Narrative, PhaseEdits, PhaseTexts};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::DbHandle;
use crate::errors::NarrateError;
use crate::fingerprint::narrative_fingerprint;
use crate::workflow::{self, WorkflowEvent};

/// Result of [`NarrativeStore::ensure`].
#[derive(Debug, Clone, Serialize)]
pub struct EnsuredNarrative {
    pub narrative: Narrative,
    pub created: bool,
}

#[derive(Clone)]
pub struct NarrativeStore {
    db: DbHandle,
}

impl NarrativeStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Create an empty narrative for the incident unless one already exists.
    pub async fn ensure(&self, incident_id: &str) -> Result<EnsuredNarrative, NarrateError> {
        let id = incident_id.to_string();
        let ensured = self
            .db
            .call(move |store| {
                workflow::load_incident(store, &id)?;
                let empty = narrative_fingerprint(&PhaseTexts::default());
                let (narrative, created) =
                    store.ensure_narrative(&id, &Uuid::new_v4().to_string(), &empty)?;
                Ok::<_, NarrateError>(EnsuredNarrative { narrative, created })
            })
            .await?;

        if ensured.created {
            info!(
                incident_id,
                narrative_id = %ensured.narrative.id,
                "created narrative"
            );
        } else {
            info!(
                incident_id,
                narrative_id = %ensured.narrative.id,
                "narrative already exists, reusing"
            );
        }
        Ok(ensured)
    }

    pub async fn get(&self, incident_id: &str) -> Result<Narrative, NarrateError> {
        let id = incident_id.to_string();
        self.db
            .call(move |store| {
                store
                    .get_narrative(&id)?
                    .ok_or_else(|| NarrateError::not_found("Narrative", &id))
            })
            .await
    }

    /// Apply the supplied phase fields, bump the version and drop both memos.
    ///
    /// The first edit also moves capture from `draft` to `in_progress`, in the
    /// same transaction.
    pub async fn apply_phase_edit(
        &self,
        incident_id: &str,
        edits: PhaseEdits,
    ) -> Result<Narrative, NarrateError> {
        if !edits.has_content() {
            return Err(NarrateError::validation(
                "At least one phase must contain narrative text",
            ));
        }

        let id = incident_id.to_string();
        let narrative = self
            .db
            .call(move |store| {
                let incident = workflow::load_incident(store, &id)?;
                workflow::ensure_open(&incident)?;

                let tx = store.transaction()?;
                let empty = narrative_fingerprint(&PhaseTexts::default());
                let (current, _) =
                    store.ensure_narrative(&id, &Uuid::new_v4().to_string(), &empty)?;

                let mut phases = current.phases.clone();
                for (phase, text) in edits.supplied() {
                    phases.set(phase, text.to_string());
                }
                let fingerprint = narrative_fingerprint(&phases);
                let updated = store.write_narrative_phases(&id, &phases, &fingerprint, Utc::now())?;
                workflow::apply_event(store, &incident, WorkflowEvent::PhaseEdited)?;

                tx.commit().context("Failed to commit phase edit")?;
                Ok::<_, NarrateError>(updated)
            })
            .await?;

        info!(
            incident_id,
            version = narrative.version,
            fingerprint = %narrative.content_fingerprint,
            "applied phase edit"
        );
        Ok(narrative)
    }

    /// Labeled concatenation of the non-empty original phases, memoized.
    pub async fn consolidate(&self, incident_id: &str) -> Result<String, NarrateError> {
        let narrative = self.get(incident_id).await?;
        if let Some(text) = narrative.consolidated_text {
            debug!(incident_id, "consolidated text served from memo");
            return Ok(text);
        }

        let text = render_consolidated(&narrative.phases);
        let id = incident_id.to_string();
        let memo = text.clone();
        self.db
            .call(move |store| store.store_consolidated_text(&id, &memo))
            .await?;
        Ok(text)
    }
}

/// `## <Label>` sections for every non-empty phase, in narrative order.
pub fn render_consolidated(phases: &PhaseTexts) -> String {
    phases
        .iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(phase, text)| format!("## {}\n{}", phase.label(), text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Originals with their enhanced counterparts under a sub-label.
pub fn render_merged(narrative: &Narrative) -> String {
    let mut sections = Vec::new();
    for (phase, original) in narrative.phases.iter() {
        let enhanced = narrative.enhanced.get(phase).trim();
        if original.trim().is_empty() && enhanced.is_empty() {
            continue;
        }
        let mut section = format!("## {}", phase.label());
        if !original.trim().is_empty() {
            section.push_str(&format!("\n{}", original.trim()));
        }
        if !enhanced.is_empty() {
            section.push_str(&format!("\n\n### Enhanced\n{}", enhanced));
        }
        sections.push(section);
    }
    sections.join("\n\n")
}
