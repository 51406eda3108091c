//! Typed error hierarchy for the narrate engine.
//!
//! - `NarrateError`: the taxonomy every entry point reports
//! - `AuthError`: capability check failures
//! - `RetryExhaustedError`: an external call failed after bounded retries
//! - `ParseError`: an AI response did not match the question contract
//! - `ServiceFailure`: a `NarrateError` tagged with its request's correlation id

use narrate_common::Capability;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the narrate engine.
#[derive(Debug, Error)]
pub enum NarrateError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid answer: {0}")]
    AnswerValidation(String),

    #[error("Capture for incident {incident_id} is finalized; no further edits are accepted")]
    WorkflowClosed { incident_id: String },

    #[error(transparent)]
    RetryExhausted(#[from] RetryExhaustedError),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl NarrateError {
    pub fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(_) => true,
            Self::Auth(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Stable snake_case name for API payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::AnswerValidation(_) => "answer_validation",
            Self::WorkflowClosed { .. } => "workflow_closed",
            Self::RetryExhausted(_) => "retry_exhausted",
            Self::Storage(_) => "storage",
        }
    }
}

/// Errors from the external authorization collaborator.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing or unknown access token")]
    InvalidToken,

    #[error("Actor {actor_id} lacks capability {capability}")]
    Denied {
        actor_id: String,
        capability: Capability,
    },

    #[error("Authorization service unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// An external call failed on every attempt.
#[derive(Debug, Error)]
#[error("{label} failed after {attempts} attempts: {last_error}")]
pub struct RetryExhaustedError {
    pub label: String,
    pub attempts: u32,
    #[source]
    pub last_error: anyhow::Error,
}

/// An AI response could not be turned into a question list.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("AI response contained no questions")]
    Empty,

    #[error("AI response did not match the question contract: {0}")]
    Contract(String),
}

/// A failed entry-point call, tagged with the request's correlation id.
#[derive(Debug, Error)]
#[error("[{correlation_id}] {error}")]
pub struct ServiceFailure {
    pub correlation_id: Uuid,
    #[source]
    pub error: NarrateError,
}
