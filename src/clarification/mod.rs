//! Clarification question cache and answer ledger.
//!
//! Questions for an (incident, phase) are regenerated only when the phase
//! text's fingerprint differs from the one the active batch was generated
//! from. Generation runs outside any lock; persistence re-checks the
//! fingerprint under a per-(incident, phase) mutex so concurrent callers
//! settle on one batch. A batch whose text no longer matches the stored
//! narrative is discarded, so a slow generation for an older edit can never
//! replace questions for the current one.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use narrate_common::{
    AnsweredQuestion, ClarificationAnswer, ClarificationQuestion, Incident, Lifecycle, Narrative,
    NarrativePhase,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::DbHandle;
use crate::errors::NarrateError;
use crate::fingerprint::text_fingerprint;
use crate::questions::{IncidentContext, QuestionGenerator, QuestionSource};
use crate::workflow;

pub const DEFAULT_COMPLETENESS_THRESHOLD: usize = 10;

/// Result of [`ClarificationLedger::ensure_questions`].
#[derive(Debug, Clone, Serialize)]
pub struct EnsuredQuestions {
    pub phase: NarrativePhase,
    pub questions: Vec<ClarificationQuestion>,
    pub cached: bool,
    pub generation_id: String,
    pub fingerprint: String,
    /// Set when this call generated the batch.
    pub source: Option<QuestionSource>,
}

/// Per-phase result of a generate-all batch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PhaseOutcome {
    AiGenerated {
        phase: NarrativePhase,
        questions: Vec<ClarificationQuestion>,
    },
    Fallback {
        phase: NarrativePhase,
        questions: Vec<ClarificationQuestion>,
    },
    Cached {
        phase: NarrativePhase,
        questions: Vec<ClarificationQuestion>,
    },
    SkippedEmpty {
        phase: NarrativePhase,
    },
    Failed {
        phase: NarrativePhase,
        error: String,
        kind: &'static str,
    },
}

impl PhaseOutcome {
    pub fn phase(&self) -> NarrativePhase {
        match self {
            Self::AiGenerated { phase, .. }
            | Self::Fallback { phase, .. }
            | Self::Cached { phase, .. }
            | Self::SkippedEmpty { phase }
            | Self::Failed { phase, .. } => *phase,
        }
    }

    fn from_result(phase: NarrativePhase, result: Result<EnsuredQuestions, NarrateError>) -> Self {
        match result {
            Ok(ensured) if ensured.cached => Self::Cached {
                phase,
                questions: ensured.questions,
            },
            Ok(ensured) => match ensured.source {
                Some(QuestionSource::Fallback) => Self::Fallback {
                    phase,
                    questions: ensured.questions,
                },
                _ => Self::AiGenerated {
                    phase,
                    questions: ensured.questions,
                },
            },
            Err(e) => Self::Failed {
                phase,
                kind: e.kind(),
                error: e.to_string(),
            },
        }
    }
}

/// Text statistics for an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerMetrics {
    pub character_count: usize,
    pub word_count: usize,
    pub is_complete: bool,
}

impl AnswerMetrics {
    /// Characters are Unicode scalar values; complete means strictly more than `threshold`.
    pub fn measure(text: &str, threshold: usize) -> Self {
        let character_count = text.chars().count();
        Self {
            character_count,
            word_count: text.split_whitespace().count(),
            is_complete: character_count > threshold,
        }
    }
}

type LockKey = (String, NarrativePhase);

pub struct ClarificationLedger {
    db: DbHandle,
    generator: Arc<QuestionGenerator>,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    completeness_threshold: usize,
}

impl ClarificationLedger {
    pub fn new(db: DbHandle, generator: Arc<QuestionGenerator>) -> Self {
        Self {
            db,
            generator,
            locks: DashMap::new(),
            completeness_threshold: DEFAULT_COMPLETENESS_THRESHOLD,
        }
    }

    pub fn with_completeness_threshold(mut self, threshold: usize) -> Self {
        self.completeness_threshold = threshold;
        self
    }

    fn lock_for(&self, incident_id: &str, phase: NarrativePhase) -> Arc<Mutex<()>> {
        self.locks
            .entry((incident_id.to_string(), phase))
            .or_default()
            .clone()
    }

    /// Return the phase's active questions, regenerating them when the text changed.
    pub async fn ensure_questions(
        &self,
        incident: &Incident,
        phase: NarrativePhase,
        narrative_text: &str,
    ) -> Result<EnsuredQuestions, NarrateError> {
        if narrative_text.trim().is_empty() {
            return Err(NarrateError::validation(format!(
                "{} narrative text is empty; nothing to clarify",
                phase.label()
            )));
        }
        workflow::ensure_open(incident)?;

        let fingerprint = text_fingerprint(narrative_text);
        if let Some(hit) = self.cached_batch(&incident.id, phase, &fingerprint).await? {
            info!(
                incident_id = %incident.id,
                phase = %phase,
                fingerprint = %fingerprint,
                generation_id = %hit.generation_id,
                "clarification cache hit"
            );
            return Ok(hit);
        }

        debug!(
            incident_id = %incident.id,
            phase = %phase,
            fingerprint = %fingerprint,
            "clarification cache miss, generating"
        );
        let batch = self
            .generator
            .generate_for_phase(&IncidentContext::from(incident), phase, narrative_text)
            .await?;

        let lock = self.lock_for(&incident.id, phase);
        let _guard = lock.lock().await;

        let incident_id = incident.id.clone();
        let fp = fingerprint.clone();
        let questions = batch.questions.clone();
        let generation_id = batch.generation_id.clone();
        let persisted = self
            .db
            .call(move |store| {
                let current = workflow::load_incident(store, &incident_id)?;
                workflow::ensure_open(&current)?;

                let narrative = store
                    .get_narrative(&incident_id)?
                    .ok_or_else(|| NarrateError::not_found("Narrative", &incident_id))?;
                if text_fingerprint(narrative.phases.get(phase)) != fp {
                    return Err(NarrateError::validation(format!(
                        "{} narrative text changed while questions were generated; request them again",
                        phase.label()
                    )));
                }

                let active = store.active_questions(&incident_id, phase)?;
                let stored = store.phase_fingerprint(&incident_id, phase)?;
                if !active.is_empty() && stored.as_deref() == Some(fp.as_str()) {
                    return Ok::<_, NarrateError>(Some(active));
                }
                store.replace_active_questions(
                    &incident_id,
                    phase,
                    &questions,
                    &fp,
                    &generation_id,
                    Utc::now(),
                )?;
                Ok(None)
            })
            .await?;

        if let Some(existing) = persisted {
            info!(
                incident_id = %incident.id,
                phase = %phase,
                fingerprint = %fingerprint,
                discarded_generation = %batch.generation_id,
                "concurrent generation already stored this fingerprint"
            );
            let generation_id = existing
                .first()
                .map(|q| q.generation_id.clone())
                .unwrap_or_default();
            return Ok(EnsuredQuestions {
                phase,
                questions: existing,
                cached: true,
                generation_id,
                fingerprint,
                source: None,
            });
        }

        info!(
            incident_id = %incident.id,
            phase = %phase,
            fingerprint = %fingerprint,
            generation_id = %batch.generation_id,
            source = ?batch.source,
            attempts = batch.attempts,
            count = batch.questions.len(),
            "stored clarification questions"
        );
        Ok(EnsuredQuestions {
            phase,
            questions: batch.questions,
            cached: false,
            generation_id: batch.generation_id,
            fingerprint,
            source: Some(batch.source),
        })
    }

    async fn cached_batch(
        &self,
        incident_id: &str,
        phase: NarrativePhase,
        fingerprint: &str,
    ) -> Result<Option<EnsuredQuestions>, NarrateError> {
        let id = incident_id.to_string();
        let (active, stored) = self
            .db
            .call(move |store| {
                let active = store.active_questions(&id, phase)?;
                let stored = store.phase_fingerprint(&id, phase)?;
                Ok::<_, anyhow::Error>((active, stored))
            })
            .await?;

        if active.is_empty() || stored.as_deref() != Some(fingerprint) {
            return Ok(None);
        }
        Ok(Some(EnsuredQuestions {
            phase,
            generation_id: active[0].generation_id.clone(),
            questions: active,
            cached: true,
            fingerprint: fingerprint.to_string(),
            source: None,
        }))
    }

    /// Ensure questions for all four phases concurrently.
    ///
    /// Never fails as a whole; each phase reports its own outcome.
    pub async fn generate_all(&self, incident: &Incident, narrative: &Narrative) -> Vec<PhaseOutcome> {
        let tasks = NarrativePhase::ALL.into_iter().map(|phase| async move {
            let text = narrative.phases.get(phase);
            if text.trim().is_empty() {
                return PhaseOutcome::SkippedEmpty { phase };
            }
            let result = self.ensure_questions(incident, phase, text).await;
            if let Err(e) = &result {
                warn!(incident_id = %incident.id, phase = %phase, error = %e, "phase generation failed");
            }
            PhaseOutcome::from_result(phase, result)
        });
        join_all(tasks).await
    }

    /// Record or replace the answer to one question.
    pub async fn submit_answer(
        &self,
        incident_id: &str,
        phase: NarrativePhase,
        question_id: &str,
        text: &str,
        author: &str,
    ) -> Result<ClarificationAnswer, NarrateError> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(NarrateError::AnswerValidation(
                "Answer text must not be empty".to_string(),
            ));
        }
        let metrics = AnswerMetrics::measure(&text, self.completeness_threshold);

        let lock = self.lock_for(incident_id, phase);
        let _guard = lock.lock().await;

        let (id, qid, author) = (
            incident_id.to_string(),
            question_id.to_string(),
            author.to_string(),
        );
        let answer = self
            .db
            .call(move |store| {
                let incident = workflow::load_incident(store, &id)?;
                workflow::ensure_open(&incident)?;

                let question = store
                    .get_question(&id, phase, &qid)?
                    .ok_or_else(|| NarrateError::not_found("Question", &qid))?;
                if question.lifecycle == Lifecycle::Retired {
                    return Err(NarrateError::validation(format!(
                        "Question {} was retired by a newer generation; answer the active questions instead",
                        qid
                    )));
                }

                let now = Utc::now();
                let tx = store.transaction()?;
                let answer = store.upsert_answer(&ClarificationAnswer {
                    incident_id: id.clone(),
                    phase,
                    question_id: qid,
                    answer_text: text,
                    character_count: metrics.character_count as i64,
                    word_count: metrics.word_count as i64,
                    is_complete: metrics.is_complete,
                    answered_by: author,
                    created_at: now,
                    updated_at: now,
                })?;
                workflow::record_answer_progress(store, &id, phase, now)?;
                tx.commit().map_err(anyhow::Error::from)?;
                Ok(answer)
            })
            .await?;

        info!(
            incident_id,
            phase = %phase,
            question_id,
            characters = answer.character_count,
            complete = answer.is_complete,
            "stored clarification answer"
        );
        Ok(answer)
    }

    /// Questions with their answers, ordered by phase then position.
    pub async fn get_questions(
        &self,
        incident_id: &str,
        phase: Option<NarrativePhase>,
        include_retired: bool,
    ) -> Result<Vec<AnsweredQuestion>, NarrateError> {
        let id = incident_id.to_string();
        Ok(self
            .db
            .call(move |store| store.list_questions(&id, phase, include_retired))
            .await?)
    }
}
