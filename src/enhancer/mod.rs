//! Enhanced phase text and the merged consolidated view.
//!
//! Enhancement is allowed after capture closes; it feeds downstream review and
//! never changes the narrative version.

use chrono::Utc;
use narrate_common::{Narrative, NarrativePhase};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::DbHandle;
use crate::errors::NarrateError;
use crate::narrative::{render_consolidated, render_merged};

/// Both consolidated views of a narrative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsolidatedNarrative {
    pub incident_id: String,
    pub narrative_id: String,
    pub version: i64,
    /// Original phase texts only.
    pub consolidated_text: String,
    /// Originals with enhanced text under each phase.
    pub merged_text: String,
}

#[derive(Clone)]
pub struct NarrativeEnhancer {
    db: DbHandle,
}

impl NarrativeEnhancer {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub async fn enhance(
        &self,
        incident_id: &str,
        phase: NarrativePhase,
        enhanced_text: &str,
    ) -> Result<Narrative, NarrateError> {
        let text = enhanced_text.trim().to_string();
        if text.is_empty() {
            return Err(NarrateError::validation("Enhanced text must not be empty"));
        }

        let id = incident_id.to_string();
        let narrative = self
            .db
            .call(move |store| {
                if store.get_narrative(&id)?.is_none() {
                    return Err(NarrateError::not_found("Narrative", &id));
                }
                Ok(store.write_enhanced_phase(&id, phase, &text, Utc::now())?)
            })
            .await?;

        info!(
            incident_id,
            phase = %phase,
            version = narrative.version,
            "stored enhanced phase text"
        );
        Ok(narrative)
    }

    /// Both views, each served from its memo when present and rebuilt otherwise.
    pub async fn get_consolidated(
        &self,
        incident_id: &str,
    ) -> Result<ConsolidatedNarrative, NarrateError> {
        let id = incident_id.to_string();
        self.db
            .call(move |store| {
                let narrative = store
                    .get_narrative(&id)?
                    .ok_or_else(|| NarrateError::not_found("Narrative", &id))?;

                let consolidated_text = match &narrative.consolidated_text {
                    Some(text) => text.clone(),
                    None => {
                        let text = render_consolidated(&narrative.phases);
                        store.store_consolidated_text(&id, &text)?;
                        text
                    }
                };
                let merged_text = match &narrative.merged_text {
                    Some(text) => {
                        debug!(incident_id = %id, "merged text served from memo");
                        text.clone()
                    }
                    None => {
                        let text = render_merged(&narrative);
                        store.store_merged_text(&id, &text)?;
                        text
                    }
                };

                Ok(ConsolidatedNarrative {
                    incident_id: id,
                    narrative_id: narrative.id,
                    version: narrative.version,
                    consolidated_text,
                    merged_text,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::new_incident;
    use crate::narrative::NarrativeStore;
    use narrate_common::PhaseEdits;

    async fn setup() -> anyhow::Result<(NarrativeStore, NarrativeEnhancer)> {
        let db = DbHandle::in_memory()?;
        db.call(|s| s.insert_incident(&new_incident("I1"))).await?;
        Ok((NarrativeStore::new(db.clone()), NarrativeEnhancer::new(db)))
    }

    #[tokio::test]
    async fn test_enhance_requires_narrative() -> anyhow::Result<()> {
        let (_, enhancer) = setup().await?;
        let err = enhancer
            .enhance("I1", NarrativePhase::DuringEvent, "More detail.")
            .await
            .unwrap_err();
        assert!(matches!(err, NarrateError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_enhance_rejects_empty_text() -> anyhow::Result<()> {
        let (narratives, enhancer) = setup().await?;
        narratives.ensure("I1").await?;
        let err = enhancer
            .enhance("I1", NarrativePhase::DuringEvent, " ")
            .await
            .unwrap_err();
        assert!(matches!(err, NarrateError::Validation(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_enhance_invalidates_merged_memo_only() -> anyhow::Result<()> {
        let (narratives, enhancer) = setup().await?;
        narratives
            .apply_phase_edit(
                "I1",
                PhaseEdits::single(NarrativePhase::DuringEvent, "The ladder slipped."),
            )
            .await?;

        let before = enhancer.get_consolidated("I1").await?;
        assert_eq!(before.consolidated_text, "## During Event\nThe ladder slipped.");
        assert_eq!(before.merged_text, before.consolidated_text);

        let enhanced = enhancer
            .enhance(
                "I1",
                NarrativePhase::DuringEvent,
                "The ladder base slid on the wet floor.",
            )
            .await?;
        assert_eq!(enhanced.version, before.version);
        assert!(enhanced.merged_text.is_none());
        assert!(enhanced.consolidated_text.is_some());

        let after = enhancer.get_consolidated("I1").await?;
        assert_eq!(after.consolidated_text, before.consolidated_text);
        assert_eq!(
            after.merged_text,
            "## During Event\nThe ladder slipped.\n\n### Enhanced\nThe ladder base slid on the wet floor."
        );

        let memo = narratives.get("I1").await?;
        assert_eq!(memo.merged_text.as_deref(), Some(after.merged_text.as_str()));
        Ok(())
    }
}
