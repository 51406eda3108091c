use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use narrate_common::{NarrativePhase, PhaseEdits, PhaseTexts};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{NarrateError, ServiceFailure};
use crate::service::{NarrateService, RegisterIncident, ServiceResponse};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub service: NarrateService,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct EnhanceRequest {
    pub phase: String,
    pub enhanced_text: String,
}

#[derive(Deserialize)]
pub struct AnswerRequest {
    pub question_id: String,
    pub answer_text: String,
}

/// Optional body for single-phase generation.
#[derive(Deserialize)]
pub struct GenerateRequest {
    pub narrative_text: String,
}

#[derive(Deserialize)]
pub struct QuestionsQuery {
    pub phase: Option<String>,
    #[serde(default)]
    pub include_retired: bool,
}

// ── Responses ─────────────────────────────────────────────────────────

/// A service result rendered as `{correlation_id, data}`.
pub struct ApiResponse<T> {
    status: StatusCode,
    body: ServiceResponse<T>,
}

impl<T> ApiResponse<T> {
    fn ok(body: ServiceResponse<T>) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    fn with_status(status: StatusCode, body: ServiceResponse<T>) -> Self {
        Self { status, body }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let correlation_id = self.body.correlation_id;
        let mut response = (self.status, Json(self.body)).into_response();
        set_correlation_header(&mut response, correlation_id);
        response
    }
}

// ── Error handling ────────────────────────────────────────────────────

/// A failure rendered as `{correlation_id, error, kind}`.
pub struct ApiError(ServiceFailure);

impl ApiError {
    /// Rejections raised before the request reaches the service.
    fn rejected(error: NarrateError) -> Self {
        Self(ServiceFailure {
            correlation_id: Uuid::new_v4(),
            error,
        })
    }
}

impl From<ServiceFailure> for ApiError {
    fn from(failure: ServiceFailure) -> Self {
        Self(failure)
    }
}

pub fn status_for(error: &NarrateError) -> StatusCode {
    match error {
        NarrateError::Auth(_) => StatusCode::FORBIDDEN,
        NarrateError::NotFound { .. } => StatusCode::NOT_FOUND,
        NarrateError::Validation(_) | NarrateError::AnswerValidation(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        NarrateError::WorkflowClosed { .. } => StatusCode::CONFLICT,
        NarrateError::RetryExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
        NarrateError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ServiceFailure {
            correlation_id,
            error,
        } = self.0;
        let body = serde_json::json!({
            "correlation_id": correlation_id,
            "error": error.to_string(),
            "kind": error.kind(),
        });
        let mut response = (status_for(&error), Json(body)).into_response();
        set_correlation_header(&mut response, correlation_id);
        response
    }
}

fn set_correlation_header(response: &mut Response, correlation_id: Uuid) {
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/incidents", post(register_incident))
        .route("/api/incidents/{id}", get(get_incident))
        .route(
            "/api/incidents/{id}/narrative",
            post(create_narrative).patch(update_narrative_phases),
        )
        .route("/api/incidents/{id}/narrative/enhance", post(enhance_narrative))
        .route(
            "/api/incidents/{id}/narrative/consolidated",
            get(get_consolidated_narrative),
        )
        .route(
            "/api/incidents/{id}/clarifications",
            get(get_clarification_questions),
        )
        .route(
            "/api/incidents/{id}/clarifications/generate",
            post(generate_all_clarification_questions),
        )
        .route(
            "/api/incidents/{id}/clarifications/{phase}/generate",
            post(generate_clarification_questions),
        )
        .route(
            "/api/incidents/{id}/clarifications/{phase}/answers",
            post(submit_clarification_answer),
        )
        .route("/api/incidents/{id}/capture/finalize", post(finalize_capture))
        .route("/api/incidents/{id}/analysis/start", post(start_analysis))
        .route("/api/incidents/{id}/analysis/complete", post(complete_analysis))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// The bearer token, or an empty string which no authorizer accepts.
fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("")
}

fn parse_phase(raw: &str) -> Result<NarrativePhase, ApiError> {
    raw.parse::<NarrativePhase>().map_err(|_| {
        ApiError::rejected(NarrateError::validation(format!(
            "Unknown phase '{}': expected before_event, during_event, end_event or post_event",
            raw
        )))
    })
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn register_incident(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<RegisterIncident>,
) -> Result<impl IntoResponse, ApiError> {
    let res = state
        .service
        .register_incident(bearer_token(&headers), req)
        .await?;
    Ok(ApiResponse::with_status(StatusCode::CREATED, res))
}

async fn get_incident(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let res = state
        .service
        .get_incident(bearer_token(&headers), &id)
        .await?;
    Ok(ApiResponse::ok(res))
}

async fn create_narrative(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let res = state
        .service
        .create_narrative(bearer_token(&headers), &id)
        .await?;
    let status = if res.data.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(ApiResponse::with_status(status, res))
}

async fn update_narrative_phases(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(edits): Json<PhaseEdits>,
) -> Result<impl IntoResponse, ApiError> {
    let res = state
        .service
        .update_narrative_phases(bearer_token(&headers), &id, edits)
        .await?;
    Ok(ApiResponse::ok(res))
}

async fn enhance_narrative(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<EnhanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = parse_phase(&req.phase)?;
    let res = state
        .service
        .enhance_narrative(bearer_token(&headers), &id, phase, &req.enhanced_text)
        .await?;
    Ok(ApiResponse::ok(res))
}

async fn get_consolidated_narrative(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let res = state
        .service
        .get_consolidated_narrative(bearer_token(&headers), &id)
        .await?;
    Ok(ApiResponse::ok(res))
}

async fn get_clarification_questions(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<QuestionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = query.phase.as_deref().map(parse_phase).transpose()?;
    let res = state
        .service
        .get_clarification_questions(bearer_token(&headers), &id, phase, query.include_retired)
        .await?;
    Ok(ApiResponse::ok(res))
}

async fn generate_all_clarification_questions(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<PhaseTexts>>,
) -> Result<impl IntoResponse, ApiError> {
    let texts = body.map(|Json(texts)| texts);
    let res = state
        .service
        .generate_all_clarification_questions(bearer_token(&headers), &id, texts.as_ref())
        .await?;
    Ok(ApiResponse::ok(res))
}

async fn generate_clarification_questions(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((id, phase)): Path<(String, String)>,
    body: Option<Json<GenerateRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = parse_phase(&phase)?;
    let text = body.map(|Json(req)| req.narrative_text);
    let res = state
        .service
        .generate_clarification_questions(bearer_token(&headers), &id, phase, text.as_deref())
        .await?;
    Ok(ApiResponse::ok(res))
}

async fn submit_clarification_answer(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((id, phase)): Path<(String, String)>,
    Json(req): Json<AnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = parse_phase(&phase)?;
    let res = state
        .service
        .submit_clarification_answer(
            bearer_token(&headers),
            &id,
            phase,
            &req.question_id,
            &req.answer_text,
        )
        .await?;
    Ok(ApiResponse::ok(res))
}

async fn finalize_capture(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let res = state
        .service
        .finalize_capture(bearer_token(&headers), &id)
        .await?;
    Ok(ApiResponse::ok(res))
}

async fn start_analysis(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let res = state
        .service
        .start_analysis(bearer_token(&headers), &id)
        .await?;
    Ok(ApiResponse::ok(res))
}

async fn complete_analysis(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let res = state
        .service
        .complete_analysis(bearer_token(&headers), &id)
        .await?;
    Ok(ApiResponse::ok(res))
}
