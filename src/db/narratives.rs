use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use narrate_common::{Narrative, NarrativePhase, PhaseTexts};
use rusqlite::{OptionalExtension, params};

use super::Store;

const NARRATIVE_COLUMNS: &str = "id, incident_id,
     before_event, during_event, end_event, post_event,
     enhanced_before_event, enhanced_during_event, enhanced_end_event, enhanced_post_event,
     consolidated_text, merged_text, content_fingerprint, version,
     created_at, updated_at, enhanced_at";

fn narrative_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Narrative> {
    Ok(Narrative {
        id: row.get(0)?,
        incident_id: row.get(1)?,
        phases: PhaseTexts {
            before_event: row.get(2)?,
            during_event: row.get(3)?,
            end_event: row.get(4)?,
            post_event: row.get(5)?,
        },
        enhanced: PhaseTexts {
            before_event: row.get(6)?,
            during_event: row.get(7)?,
            end_event: row.get(8)?,
            post_event: row.get(9)?,
        },
        consolidated_text: row.get(10)?,
        merged_text: row.get(11)?,
        content_fingerprint: row.get(12)?,
        version: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
        enhanced_at: row.get(16)?,
    })
}

fn enhanced_column(phase: NarrativePhase) -> &'static str {
    match phase {
        NarrativePhase::BeforeEvent => "enhanced_before_event",
        NarrativePhase::DuringEvent => "enhanced_during_event",
        NarrativePhase::EndEvent => "enhanced_end_event",
        NarrativePhase::PostEvent => "enhanced_post_event",
    }
}

impl Store {
    // ── Narratives ────────────────────────────────────────────────────

    /// Insert an empty narrative unless one already exists.
    ///
    /// Returns the stored narrative and whether this call created it.
    pub fn ensure_narrative(
        &self,
        incident_id: &str,
        new_id: &str,
        empty_fingerprint: &str,
    ) -> Result<(Narrative, bool)> {
        let now = Utc::now();
        let inserted = self
            .conn
            .execute(
                "INSERT INTO narratives (id, incident_id, content_fingerprint, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)
                 ON CONFLICT(incident_id) DO NOTHING",
                params![new_id, incident_id, empty_fingerprint, now],
            )
            .context("Failed to insert narrative")?;
        let narrative = self
            .get_narrative(incident_id)?
            .context("Narrative not found after insert")?;
        Ok((narrative, inserted == 1))
    }

    pub fn get_narrative(&self, incident_id: &str) -> Result<Option<Narrative>> {
        let sql = format!("SELECT {NARRATIVE_COLUMNS} FROM narratives WHERE incident_id = ?1");
        self.conn
            .query_row(&sql, params![incident_id], narrative_from_row)
            .optional()
            .context("Failed to query narrative")
    }

    /// Replace all four phase texts, bump the version by one and drop both memos.
    pub fn write_narrative_phases(
        &self,
        incident_id: &str,
        phases: &PhaseTexts,
        fingerprint: &str,
        at: DateTime<Utc>,
    ) -> Result<Narrative> {
        let updated = self
            .conn
            .execute(
                "UPDATE narratives SET
                    before_event = ?1, during_event = ?2, end_event = ?3, post_event = ?4,
                    content_fingerprint = ?5,
                    version = version + 1,
                    consolidated_text = NULL,
                    merged_text = NULL,
                    updated_at = ?6
                 WHERE incident_id = ?7",
                params![
                    phases.before_event,
                    phases.during_event,
                    phases.end_event,
                    phases.post_event,
                    fingerprint,
                    at,
                    incident_id
                ],
            )
            .context("Failed to update narrative phases")?;
        anyhow::ensure!(updated == 1, "Narrative for incident {} not found", incident_id);
        self.get_narrative(incident_id)?
            .context("Narrative not found after update")
    }

    pub fn write_enhanced_phase(
        &self,
        incident_id: &str,
        phase: NarrativePhase,
        text: &str,
        at: DateTime<Utc>,
    ) -> Result<Narrative> {
        let sql = format!(
            "UPDATE narratives SET {} = ?1, merged_text = NULL, enhanced_at = ?2, updated_at = ?2
             WHERE incident_id = ?3",
            enhanced_column(phase)
        );
        let updated = self
            .conn
            .execute(&sql, params![text, at, incident_id])
            .context("Failed to update enhanced phase")?;
        anyhow::ensure!(updated == 1, "Narrative for incident {} not found", incident_id);
        self.get_narrative(incident_id)?
            .context("Narrative not found after enhancement")
    }

    pub fn store_consolidated_text(&self, incident_id: &str, text: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE narratives SET consolidated_text = ?1 WHERE incident_id = ?2",
                params![text, incident_id],
            )
            .context("Failed to store consolidated text")?;
        Ok(())
    }

    pub fn store_merged_text(&self, incident_id: &str, text: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE narratives SET merged_text = ?1 WHERE incident_id = ?2",
                params![text, incident_id],
            )
            .context("Failed to store merged text")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::new_incident;

    fn store_with_incident() -> Result<Store> {
        let store = Store::new_in_memory()?;
        store.insert_incident(&new_incident("I1"))?;
        Ok(store)
    }

    #[test]
    fn test_ensure_narrative_is_idempotent() -> Result<()> {
        let store = store_with_incident()?;
        let (first, created) = store.ensure_narrative("I1", "n-1", "fp")?;
        assert!(created);
        let (second, created_again) = store.ensure_narrative("I1", "n-2", "fp")?;
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        assert_eq!(second.id, "n-1");

        let count: i64 = store.conn.query_row(
            "SELECT COUNT(*) FROM narratives WHERE incident_id = 'I1'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn test_incident_reports_narrative_id() -> Result<()> {
        let store = store_with_incident()?;
        store.ensure_narrative("I1", "n-1", "fp")?;
        let incident = store.get_incident("I1")?.expect("incident should exist");
        assert_eq!(incident.narrative_id.as_deref(), Some("n-1"));
        Ok(())
    }

    #[test]
    fn test_narrative_requires_incident() -> Result<()> {
        let store = Store::new_in_memory()?;
        assert!(store.ensure_narrative("missing", "n-1", "fp").is_err());
        Ok(())
    }

    #[test]
    fn test_write_phases_bumps_version_and_clears_memos() -> Result<()> {
        let store = store_with_incident()?;
        store.ensure_narrative("I1", "n-1", "fp0")?;
        store.store_consolidated_text("I1", "cached")?;
        store.store_merged_text("I1", "merged")?;

        let mut phases = PhaseTexts::default();
        phases.before_event = "Shift started at 7am".into();
        let updated = store.write_narrative_phases("I1", &phases, "fp1", Utc::now())?;

        assert_eq!(updated.version, 2);
        assert_eq!(updated.content_fingerprint, "fp1");
        assert_eq!(updated.phases.before_event, "Shift started at 7am");
        assert!(updated.consolidated_text.is_none());
        assert!(updated.merged_text.is_none());
        Ok(())
    }

    #[test]
    fn test_write_enhanced_phase_clears_only_merged_memo() -> Result<()> {
        let store = store_with_incident()?;
        store.ensure_narrative("I1", "n-1", "fp0")?;
        store.store_consolidated_text("I1", "cached")?;
        store.store_merged_text("I1", "merged")?;

        let updated = store.write_enhanced_phase(
            "I1",
            NarrativePhase::PostEvent,
            "Supervisor notified within ten minutes.",
            Utc::now(),
        )?;

        assert_eq!(
            updated.enhanced.post_event,
            "Supervisor notified within ten minutes."
        );
        assert_eq!(updated.consolidated_text.as_deref(), Some("cached"));
        assert!(updated.merged_text.is_none());
        assert!(updated.enhanced_at.is_some());
        assert_eq!(updated.version, 1);
        Ok(())
    }
}
