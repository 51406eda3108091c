use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use narrate_common::{
    AnalysisStatus, CaptureStatus, Incident, NarrativePhase, NewIncident, OverallStatus,
    PhaseProgress,
};
use rusqlite::{OptionalExtension, params};

use super::{Store, parse_column};

const INCIDENT_COLUMNS: &str = "i.id, i.company_id, i.participant_name, i.reporter_name, i.location, i.event_at,
     i.capture_status, i.overall_status, i.analysis_status, n.id, i.created_at, i.updated_at";

fn incident_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Incident> {
    Ok(Incident {
        id: row.get(0)?,
        company_id: row.get(1)?,
        participant_name: row.get(2)?,
        reporter_name: row.get(3)?,
        location: row.get(4)?,
        event_at: row.get(5)?,
        capture_status: parse_column(row, 6)?,
        overall_status: parse_column(row, 7)?,
        analysis_status: parse_column(row, 8)?,
        narrative_id: row.get(9)?,
        progress: Vec::new(),
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl Store {
    // ── Incidents ─────────────────────────────────────────────────────

    pub fn insert_incident(&self, incident: &NewIncident) -> Result<Incident> {
        let now = Utc::now();
        self.conn
            .execute(
                "INSERT INTO incidents (id, company_id, participant_name, reporter_name, location, event_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    incident.id,
                    incident.company_id,
                    incident.participant_name,
                    incident.reporter_name,
                    incident.location,
                    incident.event_at,
                    now
                ],
            )
            .context("Failed to insert incident")?;
        self.get_incident(&incident.id)?
            .context("Incident not found after insert")
    }

    pub fn get_incident(&self, id: &str) -> Result<Option<Incident>> {
        let sql = format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents i
             LEFT JOIN narratives n ON n.incident_id = i.id
             WHERE i.id = ?1"
        );
        let incident = self
            .conn
            .query_row(&sql, params![id], incident_from_row)
            .optional()
            .context("Failed to query incident")?;

        match incident {
            Some(mut incident) => {
                incident.progress = self.phase_progress(id)?;
                Ok(Some(incident))
            }
            None => Ok(None),
        }
    }

    pub fn update_incident_status(
        &self,
        id: &str,
        capture: CaptureStatus,
        overall: OverallStatus,
        analysis: AnalysisStatus,
    ) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE incidents SET capture_status = ?1, overall_status = ?2, analysis_status = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    capture.as_str(),
                    overall.as_str(),
                    analysis.as_str(),
                    Utc::now(),
                    id
                ],
            )
            .context("Failed to update incident status")?;
        anyhow::ensure!(updated == 1, "Incident {} not found for status update", id);
        Ok(())
    }

    // ── Progress ──────────────────────────────────────────────────────

    pub fn record_phase_answer(
        &self,
        incident_id: &str,
        phase: NarrativePhase,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO phase_progress (incident_id, phase, answers_submitted, last_answer_at)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(incident_id, phase) DO UPDATE SET
                    answers_submitted = phase_progress.answers_submitted + 1,
                    last_answer_at = ?3",
                params![incident_id, phase.as_str(), at],
            )
            .context("Failed to record phase progress")?;
        Ok(())
    }

    pub fn phase_progress(&self, incident_id: &str) -> Result<Vec<PhaseProgress>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT phase, answers_submitted, last_answer_at FROM phase_progress
                 WHERE incident_id = ?1",
            )
            .context("Failed to prepare phase_progress")?;
        let rows = stmt
            .query_map(params![incident_id], |row| {
                Ok(PhaseProgress {
                    phase: parse_column(row, 0)?,
                    answers_submitted: row.get(1)?,
                    last_answer_at: row.get(2)?,
                })
            })
            .context("Failed to query phase progress")?;

        let mut progress = Vec::new();
        for row in rows {
            progress.push(row.context("Failed to read phase progress row")?);
        }
        progress.sort_by_key(|p| p.phase);
        Ok(progress)
    }
}
