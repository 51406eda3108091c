use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use narrate_common::{
    AnsweredQuestion, ClarificationAnswer, ClarificationQuestion, Lifecycle, NarrativePhase,
    QuestionProvenance,
};
use rusqlite::{OptionalExtension, params};

use super::{Store, parse_column};

const QUESTION_COLUMNS: &str = "q.incident_id, q.phase, q.question_id, q.question_text, q.question_order,
     q.generation_id, q.model_id, q.template_name, q.template_version, q.ai_backed,
     q.lifecycle, q.created_at, q.retired_at";

const ANSWER_COLUMNS: &str = "a.incident_id, a.phase, a.question_id, a.answer_text, a.character_count,
     a.word_count, a.is_complete, a.answered_by, a.created_at, a.updated_at";

fn question_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClarificationQuestion> {
    Ok(ClarificationQuestion {
        incident_id: row.get(0)?,
        phase: parse_column(row, 1)?,
        question_id: row.get(2)?,
        question_text: row.get(3)?,
        question_order: row.get(4)?,
        generation_id: row.get(5)?,
        provenance: QuestionProvenance {
            model_id: row.get(6)?,
            template_name: row.get(7)?,
            template_version: row.get(8)?,
            ai_backed: row.get(9)?,
        },
        lifecycle: parse_column(row, 10)?,
        created_at: row.get(11)?,
        retired_at: row.get(12)?,
    })
}

/// Read an answer starting at column `base`; `None` when the answer columns are NULL.
fn answer_from_row(
    row: &rusqlite::Row<'_>,
    base: usize,
) -> rusqlite::Result<Option<ClarificationAnswer>> {
    let incident_id: Option<String> = row.get(base)?;
    let Some(incident_id) = incident_id else {
        return Ok(None);
    };
    Ok(Some(ClarificationAnswer {
        incident_id,
        phase: parse_column(row, base + 1)?,
        question_id: row.get(base + 2)?,
        answer_text: row.get(base + 3)?,
        character_count: row.get(base + 4)?,
        word_count: row.get(base + 5)?,
        is_complete: row.get(base + 6)?,
        answered_by: row.get(base + 7)?,
        created_at: row.get(base + 8)?,
        updated_at: row.get(base + 9)?,
    }))
}

impl Store {
    // ── Questions ─────────────────────────────────────────────────────

    pub fn active_questions(
        &self,
        incident_id: &str,
        phase: NarrativePhase,
    ) -> Result<Vec<ClarificationQuestion>> {
        let sql = format!(
            "SELECT {QUESTION_COLUMNS} FROM clarification_questions q
             WHERE q.incident_id = ?1 AND q.phase = ?2 AND q.lifecycle = 'active'
             ORDER BY q.question_order"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare active_questions")?;
        let rows = stmt
            .query_map(params![incident_id, phase.as_str()], question_from_row)
            .context("Failed to query active questions")?;

        let mut questions = Vec::new();
        for row in rows {
            questions.push(row.context("Failed to read question row")?);
        }
        Ok(questions)
    }

    pub fn get_question(
        &self,
        incident_id: &str,
        phase: NarrativePhase,
        question_id: &str,
    ) -> Result<Option<ClarificationQuestion>> {
        let sql = format!(
            "SELECT {QUESTION_COLUMNS} FROM clarification_questions q
             WHERE q.incident_id = ?1 AND q.phase = ?2 AND q.question_id = ?3"
        );
        self.conn
            .query_row(
                &sql,
                params![incident_id, phase.as_str(), question_id],
                question_from_row,
            )
            .optional()
            .context("Failed to query question")
    }

    /// Questions for an incident with their answers, ordered by phase then position.
    ///
    /// Retired questions are included only when `include_retired` is set; they
    /// sort after the active batch of their phase, oldest batch first.
    pub fn list_questions(
        &self,
        incident_id: &str,
        phase: Option<NarrativePhase>,
        include_retired: bool,
    ) -> Result<Vec<AnsweredQuestion>> {
        let sql = format!(
            "SELECT {QUESTION_COLUMNS}, {ANSWER_COLUMNS}
             FROM clarification_questions q
             LEFT JOIN clarification_answers a
                ON a.incident_id = q.incident_id AND a.phase = q.phase AND a.question_id = q.question_id
             WHERE q.incident_id = ?1
               AND (?2 IS NULL OR q.phase = ?2)
               AND (?3 OR q.lifecycle = 'active')"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_questions")?;
        let rows = stmt
            .query_map(
                params![incident_id, phase.map(|p| p.as_str()), include_retired],
                |row| {
                    Ok(AnsweredQuestion {
                        question: question_from_row(row)?,
                        answer: answer_from_row(row, 13)?,
                    })
                },
            )
            .context("Failed to query questions")?;

        let mut questions = Vec::new();
        for row in rows {
            questions.push(row.context("Failed to read question row")?);
        }
        questions.sort_by(|a, b| {
            let (qa, qb) = (&a.question, &b.question);
            qa.phase
                .cmp(&qb.phase)
                .then_with(|| (qa.lifecycle == Lifecycle::Retired).cmp(&(qb.lifecycle == Lifecycle::Retired)))
                .then_with(|| qa.created_at.cmp(&qb.created_at))
                .then_with(|| qa.question_order.cmp(&qb.question_order))
        });
        Ok(questions)
    }

    pub fn phase_fingerprint(
        &self,
        incident_id: &str,
        phase: NarrativePhase,
    ) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT fingerprint FROM clarification_fingerprints WHERE incident_id = ?1 AND phase = ?2",
                params![incident_id, phase.as_str()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query phase fingerprint")
    }

    /// Retire the phase's active questions, insert `questions` as the new active
    /// batch and record the fingerprint they were generated from. One transaction.
    pub fn replace_active_questions(
        &self,
        incident_id: &str,
        phase: NarrativePhase,
        questions: &[ClarificationQuestion],
        fingerprint: &str,
        generation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let retired = tx
            .execute(
                "UPDATE clarification_questions SET lifecycle = 'retired', retired_at = ?1
                 WHERE incident_id = ?2 AND phase = ?3 AND lifecycle = 'active'",
                params![at, incident_id, phase.as_str()],
            )
            .context("Failed to retire active questions")?;

        for q in questions {
            tx.execute(
                "INSERT INTO clarification_questions (
                    incident_id, phase, question_id, question_text, question_order, generation_id,
                    model_id, template_name, template_version, ai_backed, lifecycle, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'active', ?11)",
                params![
                    incident_id,
                    phase.as_str(),
                    q.question_id,
                    q.question_text,
                    q.question_order,
                    q.generation_id,
                    q.provenance.model_id,
                    q.provenance.template_name,
                    q.provenance.template_version,
                    q.provenance.ai_backed,
                    q.created_at
                ],
            )
            .context("Failed to insert question")?;
        }

        tx.execute(
            "INSERT INTO clarification_fingerprints (incident_id, phase, fingerprint, generation_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(incident_id, phase) DO UPDATE SET
                fingerprint = ?3, generation_id = ?4, updated_at = ?5",
            params![incident_id, phase.as_str(), fingerprint, generation_id, at],
        )
        .context("Failed to store phase fingerprint")?;

        tx.commit().context("Failed to commit question batch")?;
        Ok(retired)
    }

    // ── Answers ───────────────────────────────────────────────────────

    /// Insert or update the single answer for (incident, phase, question).
    pub fn upsert_answer(&self, answer: &ClarificationAnswer) -> Result<ClarificationAnswer> {
        self.conn
            .execute(
                "INSERT INTO clarification_answers (
                    incident_id, phase, question_id, answer_text, character_count, word_count,
                    is_complete, answered_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT(incident_id, phase, question_id) DO UPDATE SET
                    answer_text = ?4,
                    character_count = ?5,
                    word_count = ?6,
                    is_complete = ?7,
                    answered_by = ?8,
                    updated_at = ?9",
                params![
                    answer.incident_id,
                    answer.phase.as_str(),
                    answer.question_id,
                    answer.answer_text,
                    answer.character_count,
                    answer.word_count,
                    answer.is_complete,
                    answer.answered_by,
                    answer.updated_at
                ],
            )
            .context("Failed to upsert answer")?;
        self.get_answer(&answer.incident_id, answer.phase, &answer.question_id)?
            .context("Answer not found after upsert")
    }

    pub fn get_answer(
        &self,
        incident_id: &str,
        phase: NarrativePhase,
        question_id: &str,
    ) -> Result<Option<ClarificationAnswer>> {
        let sql = format!(
            "SELECT {ANSWER_COLUMNS} FROM clarification_answers a
             WHERE a.incident_id = ?1 AND a.phase = ?2 AND a.question_id = ?3"
        );
        let answer = self
            .conn
            .query_row(
                &sql,
                params![incident_id, phase.as_str(), question_id],
                |row| answer_from_row(row, 0),
            )
            .optional()
            .context("Failed to query answer")?;
        Ok(answer.flatten())
    }

    pub fn count_answers(&self, incident_id: &str, phase: NarrativePhase) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM clarification_answers WHERE incident_id = ?1 AND phase = ?2",
                params![incident_id, phase.as_str()],
                |row| row.get(0),
            )
            .context("Failed to count answers")
    }
}
