//! Clarification question generation.
//!
//! Renders the phase's active template, asks the AI service through the
//! backoff executor, and parses the reply. Parsing happens inside the retried
//! operation, so a malformed reply costs an attempt. When every attempt fails
//! the generator returns the phase's fixed fallback set instead of an error.

mod fallback;
mod parser;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use narrate_common::{ClarificationQuestion, Incident, Lifecycle, NarrativePhase, QuestionProvenance};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ai::{AiTextService, estimate_cost};
use crate::backoff::{Attempted, Backoff};
use crate::errors::NarrateError;
use crate::templates::{
    CLARIFICATION_SUBSYSTEM, TemplateRegistry, clarification_template_body,
    clarification_template_name, render,
};

pub use fallback::fallback_questions;
pub use parser::parse_questions;

pub const DEFAULT_MAX_QUESTIONS: usize = 5;
pub const FALLBACK_MODEL_ID: &str = "fallback";

/// Incident fields substituted into clarification templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentContext {
    pub incident_id: String,
    pub participant_name: String,
    pub reporter_name: String,
    pub location: String,
    pub event_at: DateTime<Utc>,
}

impl From<&Incident> for IncidentContext {
    fn from(incident: &Incident) -> Self {
        Self {
            incident_id: incident.id.clone(),
            participant_name: incident.participant_name.clone(),
            reporter_name: incident.reporter_name.clone(),
            location: incident.location.clone(),
            event_at: incident.event_at,
        }
    }
}

/// Where a batch of questions came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionSource {
    AiGenerated,
    Fallback,
}

/// One freshly generated batch, not yet persisted.
#[derive(Debug, Clone)]
pub struct GeneratedBatch {
    pub generation_id: String,
    pub questions: Vec<ClarificationQuestion>,
    pub source: QuestionSource,
    pub attempts: u32,
}

/// Identifier shared by every question in one batch.
pub fn new_generation_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn question_id(phase: NarrativePhase, generation_id: &str, order: i64) -> String {
    format!("{}-{}-{}", phase.as_str(), generation_id, order)
}

pub struct QuestionGenerator {
    ai: Arc<dyn AiTextService>,
    templates: Arc<TemplateRegistry>,
    backoff: Backoff,
    max_questions: usize,
    cost_per_1k_tokens: Option<f64>,
}

impl QuestionGenerator {
    pub fn new(
        ai: Arc<dyn AiTextService>,
        templates: Arc<TemplateRegistry>,
        backoff: Backoff,
    ) -> Self {
        Self {
            ai,
            templates,
            backoff,
            max_questions: DEFAULT_MAX_QUESTIONS,
            cost_per_1k_tokens: None,
        }
    }

    pub fn with_max_questions(mut self, max_questions: usize) -> Self {
        self.max_questions = max_questions.max(1);
        self
    }

    pub fn with_cost_per_1k_tokens(mut self, cost: Option<f64>) -> Self {
        self.cost_per_1k_tokens = cost;
        self
    }

    /// Produce a question batch for one phase.
    ///
    /// AI exhaustion yields the fallback set. Only template lookup failures
    /// surface as errors.
    pub async fn generate_for_phase(
        &self,
        ctx: &IncidentContext,
        phase: NarrativePhase,
        narrative_text: &str,
    ) -> Result<GeneratedBatch, NarrateError> {
        let template_name = clarification_template_name(phase);
        let (body, template_version, model_hint) = match self
            .templates
            .get_active(&template_name, Some(CLARIFICATION_SUBSYSTEM))
            .await?
        {
            Some(t) => (t.body, t.version, t.model_hint),
            None => {
                warn!(template = %template_name, "no active template, using built-in body");
                (clarification_template_body(phase), 0, None)
            }
        };

        let variables = HashMap::from([
            ("participant_name", ctx.participant_name.clone()),
            ("reporter_name", ctx.reporter_name.clone()),
            ("location", ctx.location.clone()),
            ("event_at", ctx.event_at.format("%Y-%m-%d %H:%M UTC").to_string()),
            ("phase", phase.as_str().to_string()),
            ("phase_label", phase.label().to_string()),
            ("narrative_text", narrative_text.to_string()),
            ("max_questions", self.max_questions.to_string()),
        ]);
        let rendered = render(&body, &variables);
        if !rendered.is_complete() {
            warn!(
                template = %template_name,
                unmatched = ?rendered.unmatched,
                "template has unmatched tokens, dispatching anyway"
            );
        }

        let started = Instant::now();
        let label = format!("clarification questions ({})", phase);
        let prompt = rendered.text.as_str();
        let hint = model_hint.as_deref();
        let outcome = self
            .backoff
            .run(&label, |_attempt| async move {
                let completion = self.ai.complete(prompt, hint).await?;
                let texts = parse_questions(&completion.text)?;
                Ok::<_, anyhow::Error>((texts, completion.tokens_used))
            })
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let generation_id = new_generation_id();
        let (texts, source, attempts, model_id) = match outcome {
            Ok(Attempted {
                value: (texts, tokens_used),
                attempts,
            }) => {
                info!(
                    incident_id = %ctx.incident_id,
                    phase = %phase,
                    attempts,
                    latency_ms,
                    tokens_used,
                    estimated_cost = estimate_cost(tokens_used, self.cost_per_1k_tokens),
                    "generated clarification questions"
                );
                let texts: Vec<String> = texts.into_iter().take(self.max_questions).collect();
                (texts, QuestionSource::AiGenerated, attempts, self.ai.model_id().to_string())
            }
            Err(exhausted) => {
                warn!(
                    incident_id = %ctx.incident_id,
                    phase = %phase,
                    attempts = exhausted.attempts,
                    latency_ms,
                    error = %format!("{:#}", exhausted.last_error),
                    "AI generation exhausted, using fallback questions"
                );
                let texts = fallback_questions(phase)
                    .iter()
                    .map(|q| q.to_string())
                    .collect();
                (texts, QuestionSource::Fallback, exhausted.attempts, FALLBACK_MODEL_ID.to_string())
            }
        };

        let succeeded = source == QuestionSource::AiGenerated;
        if let Err(e) = self
            .templates
            .record_usage(&template_name, latency_ms, succeeded)
            .await
        {
            warn!(template = %template_name, error = %e, "failed to record template usage");
        }

        let provenance = QuestionProvenance {
            model_id,
            template_name,
            template_version,
            ai_backed: succeeded,
        };
        let now = Utc::now();
        let questions = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let order = i as i64 + 1;
                ClarificationQuestion {
                    incident_id: ctx.incident_id.clone(),
                    phase,
                    question_id: question_id(phase, &generation_id, order),
                    question_text: text,
                    question_order: order,
                    generation_id: generation_id.clone(),
                    provenance: provenance.clone(),
                    lifecycle: Lifecycle::Active,
                    created_at: now,
                    retired_at: None,
                }
            })
            .collect();

        Ok(GeneratedBatch {
            generation_id,
            questions,
            source,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedAi;
    use crate::backoff::RetryPolicy;
    use crate::db::DbHandle;
    use chrono::TimeZone;

    fn context() -> IncidentContext {
        IncidentContext {
            incident_id: "I1".into(),
            participant_name: "Jordan Lee".into(),
            reporter_name: "Sam Ortiz".into(),
            location: "Warehouse B".into(),
            event_at: Utc.with_ymd_and_hms(2026, 3, 4, 9, 30, 0).unwrap(),
        }
    }

    async fn generator(ai: Arc<ScriptedAi>) -> anyhow::Result<(QuestionGenerator, Arc<TemplateRegistry>)> {
        let templates = Arc::new(TemplateRegistry::new(DbHandle::in_memory()?));
        templates.seed_defaults().await?;
        let generator = QuestionGenerator::new(
            ai,
            templates.clone(),
            Backoff::new(RetryPolicy::immediate(3)),
        );
        Ok((generator, templates))
    }

    #[tokio::test]
    async fn test_ai_questions_get_generated_ids_and_provenance() -> anyhow::Result<()> {
        let ai = Arc::new(ScriptedAi::replying(
            r#"{"questions": ["What was the weather?", "Who was on shift?"]}"#,
        ));
        let (generator, templates) = generator(ai.clone()).await?;

        let batch = generator
            .generate_for_phase(&context(), NarrativePhase::BeforeEvent, "It was early.")
            .await?;

        assert_eq!(batch.source, QuestionSource::AiGenerated);
        assert_eq!(batch.attempts, 1);
        assert_eq!(batch.questions.len(), 2);
        let first = &batch.questions[0];
        assert_eq!(
            first.question_id,
            format!("before_event-{}-1", batch.generation_id)
        );
        assert_eq!(first.question_order, 1);
        assert!(first.provenance.ai_backed);
        assert_eq!(first.provenance.model_id, "scripted-model");
        assert_eq!(first.provenance.template_name, "clarification.before_event");
        assert_eq!(first.provenance.template_version, 1);

        let stats = templates
            .get_active("clarification.before_event", None)
            .await?
            .expect("seeded")
            .stats;
        assert_eq!(stats.usage_count, 1);
        assert_eq!(stats.success_rate, 1.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_prompt_carries_incident_fields_and_text() -> anyhow::Result<()> {
        let ai = Arc::new(
            ScriptedAi::failing("unexpected prompt")
                .script("Jordan Lee", vec![Ok(r#"{"questions": ["Ok?"]}"#.into())]),
        );
        let (generator, _) = generator(ai.clone()).await?;
        let batch = generator
            .generate_for_phase(&context(), NarrativePhase::EndEvent, "The alarm sounded.")
            .await?;
        assert_eq!(batch.source, QuestionSource::AiGenerated);
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_reply_counts_as_failed_attempt() -> anyhow::Result<()> {
        let ai = Arc::new(ScriptedAi::replying("unused").script(
            "Jordan",
            vec![
                Ok("Sorry, I cannot do that.".into()),
                Ok(r#"{"questions": ["Second try?"]}"#.into()),
            ],
        ));
        let (generator, _) = generator(ai.clone()).await?;
        let batch = generator
            .generate_for_phase(&context(), NarrativePhase::DuringEvent, "Text.")
            .await?;
        assert_eq!(batch.attempts, 2);
        assert_eq!(batch.questions[0].question_text, "Second try?");
        Ok(())
    }

    #[tokio::test]
    async fn test_exhaustion_returns_fallback_set() -> anyhow::Result<()> {
        let ai = Arc::new(ScriptedAi::failing("service unavailable"));
        let (generator, templates) = generator(ai.clone()).await?;

        let batch = generator
            .generate_for_phase(&context(), NarrativePhase::PostEvent, "Went home.")
            .await?;

        assert_eq!(ai.call_count(), 3);
        assert_eq!(batch.source, QuestionSource::Fallback);
        assert_eq!(batch.attempts, 3);
        assert_eq!(batch.questions.len(), 3);
        assert!(batch.questions.iter().all(|q| !q.provenance.ai_backed));
        assert_eq!(
            batch.questions[0].question_text,
            fallback_questions(NarrativePhase::PostEvent)[0]
        );

        let stats = templates
            .get_active("clarification.post_event", None)
            .await?
            .expect("seeded")
            .stats;
        assert_eq!(stats.success_rate, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_question_count_is_capped() -> anyhow::Result<()> {
        let ai = Arc::new(ScriptedAi::replying(
            r#"{"questions": ["a?", "b?", "c?", "d?", "e?", "f?", "g?"]}"#,
        ));
        let (generator, _) = generator(ai).await?;
        let batch = generator
            .generate_for_phase(&context(), NarrativePhase::EndEvent, "Text.")
            .await?;
        assert_eq!(batch.questions.len(), DEFAULT_MAX_QUESTIONS);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_template_uses_built_in_body() -> anyhow::Result<()> {
        let ai = Arc::new(ScriptedAi::replying(r#"{"questions": ["Fine?"]}"#));
        let templates = Arc::new(TemplateRegistry::new(DbHandle::in_memory()?));
        let generator = QuestionGenerator::new(ai, templates, Backoff::new(RetryPolicy::immediate(1)));
        let batch = generator
            .generate_for_phase(&context(), NarrativePhase::BeforeEvent, "Text.")
            .await?;
        assert_eq!(batch.questions[0].provenance.template_version, 0);
        Ok(())
    }

    #[test]
    fn test_generation_ids_carry_a_full_uuid() {
        let a = new_generation_id();
        let b = new_generation_id();
        assert_eq!(a.len(), 32);
        assert!(Uuid::parse_str(&a).is_ok());
        assert_ne!(a, b);
    }
}
