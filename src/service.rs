//! The entry points: every call authorizes first, runs inside a span carrying
//! a fresh correlation id, and reports failures tagged with that id.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use narrate_common::{
    Actor, AnsweredQuestion, Capability, ClarificationAnswer, Incident, Narrative,
    NarrativePhase, NewIncident, PhaseEdits, PhaseTexts, ResourceContext,
};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::ai::{self, AiTextService};
use crate::auth::{Authorizer, TokenAuthorizer};
use crate::backoff::Backoff;
use crate::clarification::{ClarificationLedger, EnsuredQuestions, PhaseOutcome};
use crate::config::NarrateToml;
use crate::db::DbHandle;
use crate::enhancer::{ConsolidatedNarrative, NarrativeEnhancer};
use crate::errors::{AuthError, NarrateError, ServiceFailure};
use crate::fingerprint::text_fingerprint;
use crate::narrative::{EnsuredNarrative, NarrativeStore};
use crate::questions::QuestionGenerator;
use crate::templates::TemplateRegistry;
use crate::workflow::{self, Workflow};

/// A successful entry-point result.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceResponse<T> {
    pub correlation_id: Uuid,
    pub data: T,
}

pub type ServiceResult<T> = Result<ServiceResponse<T>, ServiceFailure>;

/// Fields accepted by [`NarrateService::register_incident`].
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterIncident {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub participant_name: String,
    pub reporter_name: String,
    #[serde(default)]
    pub location: String,
    pub event_at: DateTime<Utc>,
}

/// Outcome of generating questions for every phase.
#[derive(Debug, Clone, Serialize)]
pub struct BatchGeneration {
    pub incident_id: String,
    pub outcomes: Vec<PhaseOutcome>,
}

pub struct NarrateService {
    authorizer: Arc<dyn Authorizer>,
    db: DbHandle,
    backoff: Backoff,
    templates: Arc<TemplateRegistry>,
    narratives: NarrativeStore,
    ledger: ClarificationLedger,
    enhancer: NarrativeEnhancer,
    workflow: Workflow,
}

impl NarrateService {
    pub fn new(
        db: DbHandle,
        ai: Arc<dyn AiTextService>,
        authorizer: Arc<dyn Authorizer>,
        config: &NarrateToml,
    ) -> Self {
        let backoff = Backoff::new(config.retry);
        let templates = Arc::new(TemplateRegistry::new(db.clone()));
        let generator = Arc::new(
            QuestionGenerator::new(ai, templates.clone(), backoff.clone())
                .with_max_questions(config.ai.max_questions)
                .with_cost_per_1k_tokens(config.ai.cost_per_1k_tokens),
        );
        let ledger = ClarificationLedger::new(db.clone(), generator)
            .with_completeness_threshold(config.clarification.completeness_threshold);

        Self {
            authorizer,
            backoff,
            templates,
            narratives: NarrativeStore::new(db.clone()),
            ledger,
            enhancer: NarrativeEnhancer::new(db.clone()),
            workflow: Workflow::new(db.clone()),
            db,
        }
    }

    /// Wire the configured AI backend and token table, and seed default templates.
    pub async fn from_config(config: &NarrateToml, db: DbHandle) -> Result<Self> {
        let ai = ai::build_service(&config.ai)?;
        let authorizer = TokenAuthorizer::new(&config.auth.tokens);
        if authorizer.is_empty() {
            warn!("no access tokens configured; every request will be rejected");
        }
        let service = Self::new(db, ai, Arc::new(authorizer), config);
        let seeded = service
            .templates
            .seed_defaults()
            .await
            .context("Failed to seed default prompt templates")?;
        if seeded > 0 {
            info!(seeded, "registered default prompt templates");
        }
        Ok(service)
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    // ── Entry points ──────────────────────────────────────────────────

    pub async fn register_incident(
        &self,
        token: &str,
        request: RegisterIncident,
    ) -> ServiceResult<Incident> {
        self.entry("register_incident", request.id.as_deref(), async {
            let actor = self
                .authorize(token, Capability::EditOwnCapture, &ResourceContext::default())
                .await?;
            if request.participant_name.trim().is_empty() {
                return Err(NarrateError::validation("participant_name must not be empty"));
            }
            if request.reporter_name.trim().is_empty() {
                return Err(NarrateError::validation("reporter_name must not be empty"));
            }

            let new = NewIncident {
                id: request
                    .id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                company_id: actor.company_id,
                participant_name: request.participant_name.trim().to_string(),
                reporter_name: request.reporter_name.trim().to_string(),
                location: request.location.trim().to_string(),
                event_at: request.event_at,
            };
            let incident = self
                .db
                .call(move |store| {
                    if store.get_incident(&new.id)?.is_some() {
                        return Err(NarrateError::validation(format!(
                            "Incident {} already exists",
                            new.id
                        )));
                    }
                    Ok(store.insert_incident(&new)?)
                })
                .await?;
            info!(incident_id = %incident.id, company_id = %incident.company_id, "registered incident");
            Ok(incident)
        })
        .await
    }

    pub async fn get_incident(&self, token: &str, incident_id: &str) -> ServiceResult<Incident> {
        self.entry("get_incident", Some(incident_id), async {
            let (_, incident) = self
                .authorize_incident(token, Capability::ViewCompanyIncidents, incident_id)
                .await?;
            Ok(incident)
        })
        .await
    }

    /// Idempotent: a second call returns the existing narrative with `created = false`.
    pub async fn create_narrative(
        &self,
        token: &str,
        incident_id: &str,
    ) -> ServiceResult<EnsuredNarrative> {
        self.entry("create_narrative", Some(incident_id), async {
            self.authorize_incident(token, Capability::EditOwnCapture, incident_id)
                .await?;
            self.narratives.ensure(incident_id).await
        })
        .await
    }

    pub async fn update_narrative_phases(
        &self,
        token: &str,
        incident_id: &str,
        edits: PhaseEdits,
    ) -> ServiceResult<Narrative> {
        self.entry("update_narrative_phases", Some(incident_id), async {
            self.authorize_incident(token, Capability::EditOwnCapture, incident_id)
                .await?;
            self.narratives.apply_phase_edit(incident_id, edits).await
        })
        .await
    }

    /// `narrative_text`, when supplied, must be the phase text currently stored.
    pub async fn generate_clarification_questions(
        &self,
        token: &str,
        incident_id: &str,
        phase: NarrativePhase,
        narrative_text: Option<&str>,
    ) -> ServiceResult<EnsuredQuestions> {
        self.entry("generate_clarification_questions", Some(incident_id), async {
            let (_, incident) = self
                .authorize_incident(token, Capability::EditOwnCapture, incident_id)
                .await?;
            let narrative = self.narratives.get(incident_id).await?;
            if let Some(text) = narrative_text {
                ensure_current_text(&narrative, phase, text)?;
            }
            self.ledger
                .ensure_questions(&incident, phase, narrative.phases.get(phase))
                .await
        })
        .await
    }

    /// Per-phase outcomes; fails as a whole only before any phase starts.
    ///
    /// `phase_texts`, when supplied, must match all four stored phase texts.
    pub async fn generate_all_clarification_questions(
        &self,
        token: &str,
        incident_id: &str,
        phase_texts: Option<&PhaseTexts>,
    ) -> ServiceResult<BatchGeneration> {
        self.entry("generate_all_clarification_questions", Some(incident_id), async {
            let (_, incident) = self
                .authorize_incident(token, Capability::EditOwnCapture, incident_id)
                .await?;
            workflow::ensure_open(&incident)?;
            let narrative = self.narratives.get(incident_id).await?;
            if let Some(texts) = phase_texts {
                for (phase, text) in texts.iter() {
                    ensure_current_text(&narrative, phase, text)?;
                }
            }
            let outcomes = self.ledger.generate_all(&incident, &narrative).await;
            Ok(BatchGeneration {
                incident_id: incident.id,
                outcomes,
            })
        })
        .await
    }

    pub async fn submit_clarification_answer(
        &self,
        token: &str,
        incident_id: &str,
        phase: NarrativePhase,
        question_id: &str,
        answer_text: &str,
    ) -> ServiceResult<ClarificationAnswer> {
        self.entry("submit_clarification_answer", Some(incident_id), async {
            let (actor, _) = self
                .authorize_incident(token, Capability::EditOwnCapture, incident_id)
                .await?;
            self.ledger
                .submit_answer(incident_id, phase, question_id, answer_text, &actor.id)
                .await
        })
        .await
    }

    pub async fn get_clarification_questions(
        &self,
        token: &str,
        incident_id: &str,
        phase: Option<NarrativePhase>,
        include_retired: bool,
    ) -> ServiceResult<Vec<AnsweredQuestion>> {
        self.entry("get_clarification_questions", Some(incident_id), async {
            self.authorize_incident(token, Capability::ViewCompanyIncidents, incident_id)
                .await?;
            self.ledger
                .get_questions(incident_id, phase, include_retired)
                .await
        })
        .await
    }

    pub async fn enhance_narrative(
        &self,
        token: &str,
        incident_id: &str,
        phase: NarrativePhase,
        enhanced_text: &str,
    ) -> ServiceResult<Narrative> {
        self.entry("enhance_narrative", Some(incident_id), async {
            self.authorize_incident(token, Capability::AccessAiFeatures, incident_id)
                .await?;
            self.enhancer
                .enhance(incident_id, phase, enhanced_text)
                .await
        })
        .await
    }

    pub async fn get_consolidated_narrative(
        &self,
        token: &str,
        incident_id: &str,
    ) -> ServiceResult<ConsolidatedNarrative> {
        self.entry("get_consolidated_narrative", Some(incident_id), async {
            self.authorize_incident(token, Capability::ViewCompanyIncidents, incident_id)
                .await?;
            self.enhancer.get_consolidated(incident_id).await
        })
        .await
    }

    pub async fn finalize_capture(&self, token: &str, incident_id: &str) -> ServiceResult<Incident> {
        self.entry("finalize_capture", Some(incident_id), async {
            self.authorize_incident(token, Capability::EditOwnCapture, incident_id)
                .await?;
            self.workflow.finalize_capture(incident_id).await
        })
        .await
    }

    pub async fn start_analysis(&self, token: &str, incident_id: &str) -> ServiceResult<Incident> {
        self.entry("start_analysis", Some(incident_id), async {
            self.authorize_incident(token, Capability::ViewCompanyIncidents, incident_id)
                .await?;
            self.workflow.start_analysis(incident_id).await
        })
        .await
    }

    pub async fn complete_analysis(
        &self,
        token: &str,
        incident_id: &str,
    ) -> ServiceResult<Incident> {
        self.entry("complete_analysis", Some(incident_id), async {
            self.authorize_incident(token, Capability::ViewCompanyIncidents, incident_id)
                .await?;
            self.workflow.complete_analysis(incident_id).await
        })
        .await
    }

    // ── Plumbing ──────────────────────────────────────────────────────

    /// Run `work` under a new correlation id and tag its outcome with it.
    async fn entry<T, Fut>(
        &self,
        operation: &'static str,
        incident_id: Option<&str>,
        work: Fut,
    ) -> ServiceResult<T>
    where
        Fut: Future<Output = Result<T, NarrateError>>,
    {
        let correlation_id = Uuid::new_v4();
        let span = info_span!(
            "entry",
            operation,
            %correlation_id,
            incident_id = incident_id.unwrap_or("-"),
        );

        async move {
            let started = Instant::now();
            match work.await {
                Ok(data) => {
                    info!(elapsed_ms = started.elapsed().as_millis() as u64, "completed");
                    Ok(ServiceResponse {
                        correlation_id,
                        data,
                    })
                }
                Err(error) => {
                    warn!(
                        kind = error.kind(),
                        error = %error,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "failed"
                    );
                    Err(ServiceFailure {
                        correlation_id,
                        error,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Capability check, retried only while the authorizer is unavailable.
    async fn authorize(
        &self,
        token: &str,
        capability: Capability,
        resource: &ResourceContext,
    ) -> Result<Actor, NarrateError> {
        let attempted = self
            .backoff
            .run_if(
                "authorization",
                |_| async move {
                    self.authorizer
                        .authorize(token, capability, resource)
                        .await
                        .map_err(NarrateError::from)
                },
                NarrateError::is_transient,
            )
            .await?;
        Ok(attempted.value)
    }

    /// Authorize against one incident and load it. Incidents of another
    /// company are denied as though the capability were missing.
    async fn authorize_incident(
        &self,
        token: &str,
        capability: Capability,
        incident_id: &str,
    ) -> Result<(Actor, Incident), NarrateError> {
        let actor = self
            .authorize(token, capability, &ResourceContext::incident(incident_id))
            .await?;

        let incident = self
            .backoff
            .run_if(
                "incident lookup",
                |_| {
                    let id = incident_id.to_string();
                    async move {
                        self.db
                            .call(move |store| workflow::load_incident(store, &id))
                            .await
                    }
                },
                NarrateError::is_transient,
            )
            .await?
            .value;

        if incident.company_id != actor.company_id {
            return Err(AuthError::Denied {
                actor_id: actor.id,
                capability,
            }
            .into());
        }
        Ok((actor, incident))
    }
}

/// Reject caller-supplied text that differs from the stored phase text.
fn ensure_current_text(
    narrative: &Narrative,
    phase: NarrativePhase,
    supplied: &str,
) -> Result<(), NarrateError> {
    if text_fingerprint(supplied) != text_fingerprint(narrative.phases.get(phase)) {
        return Err(NarrateError::validation(format!(
            "{} text does not match the stored narrative (version {}); save the edit first",
            phase.label(),
            narrative.version
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use narrate_common::{AnalysisStatus, CaptureStatus, Lifecycle, OverallStatus};

    use crate::ai::testing::ScriptedAi;
    use crate::backoff::RetryPolicy;
    use crate::config::TokenEntry;

    const EDITOR: &str = "t-editor";
    const READER: &str = "t-reader";
    const RIVAL: &str = "t-rival";

    fn tokens() -> Vec<TokenEntry> {
        vec![
            TokenEntry {
                token: EDITOR.into(),
                actor_id: "officer-1".into(),
                company_id: "acme".into(),
                capabilities: vec![
                    Capability::EditOwnCapture,
                    Capability::ViewCompanyIncidents,
                    Capability::AccessAiFeatures,
                ],
            },
            TokenEntry {
                token: READER.into(),
                actor_id: "viewer-1".into(),
                company_id: "acme".into(),
                capabilities: vec![Capability::ViewCompanyIncidents],
            },
            TokenEntry {
                token: RIVAL.into(),
                actor_id: "officer-9".into(),
                company_id: "globex".into(),
                capabilities: vec![
                    Capability::EditOwnCapture,
                    Capability::ViewCompanyIncidents,
                ],
            },
        ]
    }

    fn test_config() -> NarrateToml {
        NarrateToml {
            retry: RetryPolicy::immediate(3),
            ..NarrateToml::default()
        }
    }

    async fn service_with(ai: ScriptedAi) -> Result<(NarrateService, Arc<ScriptedAi>)> {
        let db = DbHandle::in_memory()?;
        let ai = Arc::new(ai);
        let service = NarrateService::new(
            db,
            ai.clone(),
            Arc::new(TokenAuthorizer::new(&tokens())),
            &test_config(),
        );
        service.templates().seed_defaults().await?;
        Ok((service, ai))
    }

    fn registration(id: &str) -> RegisterIncident {
        RegisterIncident {
            id: Some(id.into()),
            participant_name: "Jordan Lee".into(),
            reporter_name: "Sam Ortiz".into(),
            location: "Warehouse B".into(),
            event_at: Utc.with_ymd_and_hms(2026, 3, 4, 9, 30, 0).unwrap(),
        }
    }

    async fn registered(ai: ScriptedAi) -> Result<(NarrateService, Arc<ScriptedAi>)> {
        let (service, ai) = service_with(ai).await?;
        service.register_incident(EDITOR, registration("I1")).await?;
        Ok((service, ai))
    }

    fn questions_reply() -> ScriptedAi {
        ScriptedAi::replying(r#"{"questions": ["What were you carrying?", "Was the floor marked?"]}"#)
    }

    #[tokio::test]
    async fn test_register_uses_actor_company_and_rejects_duplicates() -> Result<()> {
        let (service, _) = service_with(questions_reply()).await?;
        let first = service.register_incident(EDITOR, registration("I1")).await?;
        assert_eq!(first.data.company_id, "acme");
        assert_eq!(first.data.capture_status, CaptureStatus::Draft);

        let dup = service
            .register_incident(EDITOR, registration("I1"))
            .await
            .unwrap_err();
        assert!(matches!(dup.error, NarrateError::Validation(_)));

        let generated = service
            .register_incident(
                EDITOR,
                RegisterIncident {
                    id: None,
                    ..registration("ignored")
                },
            )
            .await?;
        assert_ne!(generated.data.id, "I1");
        Ok(())
    }

    #[tokio::test]
    async fn test_each_call_gets_its_own_correlation_id() -> Result<()> {
        let (service, _) = registered(questions_reply()).await?;
        let a = service.get_incident(READER, "I1").await?;
        let b = service.get_incident(READER, "I1").await?;
        assert_ne!(a.correlation_id, b.correlation_id);

        let failure = service.get_incident(READER, "missing").await.unwrap_err();
        assert!(matches!(failure.error, NarrateError::NotFound { .. }));
        assert!(failure.to_string().contains(&failure.correlation_id.to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_capabilities_are_enforced() -> Result<()> {
        let (service, _) = registered(questions_reply()).await?;

        let denied = service
            .update_narrative_phases(
                READER,
                "I1",
                PhaseEdits::single(NarrativePhase::DuringEvent, "text"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            denied.error,
            NarrateError::Auth(AuthError::Denied {
                capability: Capability::EditOwnCapture,
                ..
            })
        ));

        let invalid = service.get_incident("bogus", "I1").await.unwrap_err();
        assert!(matches!(
            invalid.error,
            NarrateError::Auth(AuthError::InvalidToken)
        ));

        service.create_narrative(EDITOR, "I1").await?;
        let no_ai = service
            .enhance_narrative(READER, "I1", NarrativePhase::DuringEvent, "Better text")
            .await
            .unwrap_err();
        assert_eq!(no_ai.error.kind(), "auth");
        Ok(())
    }

    #[tokio::test]
    async fn test_other_company_incidents_are_denied() -> Result<()> {
        let (service, _) = registered(questions_reply()).await?;
        let err = service.get_incident(RIVAL, "I1").await.unwrap_err();
        assert!(matches!(
            err.error,
            NarrateError::Auth(AuthError::Denied { .. })
        ));
        Ok(())
    }

    struct FlakyAuthorizer {
        outages: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Authorizer for FlakyAuthorizer {
        async fn authorize(
            &self,
            _token: &str,
            _capability: Capability,
            _resource: &ResourceContext,
        ) -> Result<Actor, AuthError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.outages {
                return Err(AuthError::Unavailable("directory timeout".into()));
            }
            Ok(Actor {
                id: "officer-1".into(),
                company_id: "acme".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_unavailable_authorizer_is_retried_then_exhausted() -> Result<()> {
        let db = DbHandle::in_memory()?;
        let recovering = Arc::new(FlakyAuthorizer {
            outages: 2,
            calls: AtomicU32::new(0),
        });
        let service = NarrateService::new(
            db.clone(),
            Arc::new(questions_reply()),
            recovering.clone(),
            &test_config(),
        );
        service.register_incident("any", registration("I1")).await?;
        assert_eq!(recovering.calls.load(Ordering::SeqCst), 3);

        let down = Arc::new(FlakyAuthorizer {
            outages: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let service = NarrateService::new(
            db,
            Arc::new(questions_reply()),
            down.clone(),
            &test_config(),
        );
        let err = service.get_incident("any", "I1").await.unwrap_err();
        assert!(matches!(err.error, NarrateError::RetryExhausted(_)));
        assert_eq!(down.calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_narrative_is_idempotent() -> Result<()> {
        let (service, _) = registered(questions_reply()).await?;
        let first = service.create_narrative(EDITOR, "I1").await?;
        let second = service.create_narrative(EDITOR, "I1").await?;
        assert!(first.data.created);
        assert!(!second.data.created);
        assert_eq!(first.data.narrative.id, second.data.narrative.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_requires_narrative() -> Result<()> {
        let (service, ai) = registered(questions_reply()).await?;
        let err = service
            .generate_clarification_questions(EDITOR, "I1", NarrativePhase::DuringEvent, None)
            .await
            .unwrap_err();
        assert!(matches!(err.error, NarrateError::NotFound { entity: "Narrative", .. }));
        assert_eq!(ai.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_all_after_closure_is_rejected_up_front() -> Result<()> {
        let (service, ai) = registered(questions_reply()).await?;
        service
            .update_narrative_phases(
                EDITOR,
                "I1",
                PhaseEdits::single(NarrativePhase::DuringEvent, "The ladder slipped."),
            )
            .await?;
        service.finalize_capture(EDITOR, "I1").await?;

        let err = service
            .generate_all_clarification_questions(EDITOR, "I1", None)
            .await
            .unwrap_err();
        assert!(matches!(err.error, NarrateError::WorkflowClosed { .. }));
        assert_eq!(ai.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_edit_then_regenerate_through_facade() -> Result<()> {
        let (service, ai) = registered(questions_reply()).await?;
        let phase = NarrativePhase::BeforeEvent;
        service.create_narrative(EDITOR, "I1").await?;
        service
            .update_narrative_phases(EDITOR, "I1", PhaseEdits::single(phase, "X"))
            .await?;

        let first = service
            .generate_clarification_questions(EDITOR, "I1", phase, Some("X"))
            .await?
            .data;
        assert!(!first.cached);
        assert!(!first.questions.is_empty());

        let repeat = service
            .generate_clarification_questions(EDITOR, "I1", phase, Some("X"))
            .await?
            .data;
        assert!(repeat.cached);
        let first_ids: Vec<_> = first.questions.iter().map(|q| q.question_id.clone()).collect();
        let repeat_ids: Vec<_> = repeat.questions.iter().map(|q| q.question_id.clone()).collect();
        assert_eq!(first_ids, repeat_ids);
        assert_eq!(ai.call_count(), 1);

        service
            .update_narrative_phases(EDITOR, "I1", PhaseEdits::single(phase, "X updated"))
            .await?;
        let edited = service
            .generate_clarification_questions(EDITOR, "I1", phase, Some("X updated"))
            .await?
            .data;
        assert!(!edited.cached);
        assert!(edited
            .questions
            .iter()
            .all(|q| !first_ids.contains(&q.question_id)));

        let answer = service
            .submit_clarification_answer(
                EDITOR,
                "I1",
                phase,
                &edited.questions[0].question_id,
                "fifteen chars!!",
            )
            .await?
            .data;
        assert_eq!(answer.character_count, 15);
        assert!(answer.is_complete);
        Ok(())
    }

    #[tokio::test]
    async fn test_supplied_text_must_match_stored_narrative() -> Result<()> {
        let (service, ai) = registered(questions_reply()).await?;
        let phase = NarrativePhase::DuringEvent;
        service
            .update_narrative_phases(EDITOR, "I1", PhaseEdits::single(phase, "Saved text."))
            .await?;

        let err = service
            .generate_clarification_questions(EDITOR, "I1", phase, Some("Unsaved draft."))
            .await
            .unwrap_err();
        assert!(matches!(err.error, NarrateError::Validation(_)));

        let mut texts = PhaseTexts::default();
        texts.set(phase, "Unsaved draft.".into());
        let err = service
            .generate_all_clarification_questions(EDITOR, "I1", Some(&texts))
            .await
            .unwrap_err();
        assert!(matches!(err.error, NarrateError::Validation(_)));
        assert_eq!(ai.call_count(), 0);

        texts.set(phase, "Saved text.".into());
        let batch = service
            .generate_all_clarification_questions(EDITOR, "I1", Some(&texts))
            .await?
            .data;
        assert!(matches!(batch.outcomes[1], PhaseOutcome::AiGenerated { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_end_to_end_capture_clarify_enhance_analyse() -> Result<()> {
        let (service, ai) = registered(questions_reply()).await?;

        // Capture
        service.create_narrative(EDITOR, "I1").await?;
        let mut edits = PhaseEdits::default();
        edits.set(NarrativePhase::BeforeEvent, "Unloading pallets from the truck.".into());
        edits.set(NarrativePhase::DuringEvent, "The ladder slipped on the wet floor.".into());
        let narrative = service.update_narrative_phases(EDITOR, "I1", edits).await?.data;
        assert_eq!(narrative.version, 2);
        let incident = service.get_incident(READER, "I1").await?.data;
        assert_eq!(incident.capture_status, CaptureStatus::InProgress);

        // Clarify
        let batch = service
            .generate_all_clarification_questions(EDITOR, "I1", None)
            .await?
            .data;
        assert_eq!(batch.outcomes.len(), 4);
        let generated = batch
            .outcomes
            .iter()
            .filter(|o| matches!(o, PhaseOutcome::AiGenerated { .. }))
            .count();
        let skipped = batch
            .outcomes
            .iter()
            .filter(|o| matches!(o, PhaseOutcome::SkippedEmpty { .. }))
            .count();
        assert_eq!((generated, skipped), (2, 2));
        assert_eq!(ai.call_count(), 2);

        let again = service
            .generate_clarification_questions(EDITOR, "I1", NarrativePhase::DuringEvent, None)
            .await?
            .data;
        assert!(again.cached);
        assert_eq!(ai.call_count(), 2);

        let question = &again.questions[0];
        let answer = service
            .submit_clarification_answer(
                EDITOR,
                "I1",
                NarrativePhase::DuringEvent,
                &question.question_id,
                "A box of parts, about 10 kg.",
            )
            .await?
            .data;
        assert!(answer.is_complete);
        assert_eq!(answer.answered_by, "officer-1");

        let listed = service
            .get_clarification_questions(READER, "I1", Some(NarrativePhase::DuringEvent), false)
            .await?
            .data;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|q| q.question.lifecycle == Lifecycle::Active));
        assert_eq!(
            listed
                .iter()
                .filter(|q| q.answer.is_some())
                .count(),
            1
        );

        // Enhance
        service
            .enhance_narrative(
                EDITOR,
                "I1",
                NarrativePhase::DuringEvent,
                "The ladder base slid on a wet, unmarked floor while carrying a 10 kg box.",
            )
            .await?;
        let consolidated = service.get_consolidated_narrative(READER, "I1").await?.data;
        assert!(consolidated.merged_text.contains("### Enhanced"));
        assert!(!consolidated.consolidated_text.contains("### Enhanced"));

        // Close and analyse
        let closed = service.finalize_capture(EDITOR, "I1").await?.data;
        assert_eq!(closed.overall_status, OverallStatus::ReadyForAnalysis);

        let rejected = service
            .submit_clarification_answer(
                EDITOR,
                "I1",
                NarrativePhase::DuringEvent,
                &question.question_id,
                "Changed my mind about the weight.",
            )
            .await
            .unwrap_err();
        assert!(matches!(rejected.error, NarrateError::WorkflowClosed { .. }));

        let started = service.start_analysis(READER, "I1").await?.data;
        assert_eq!(started.analysis_status, AnalysisStatus::InProgress);
        let done = service.complete_analysis(READER, "I1").await?.data;
        assert_eq!(done.analysis_status, AnalysisStatus::Completed);
        assert_eq!(done.overall_status, OverallStatus::Completed);

        let twice = service.complete_analysis(READER, "I1").await.unwrap_err();
        assert!(matches!(twice.error, NarrateError::Validation(_)));
        Ok(())
    }
}
