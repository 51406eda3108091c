//! Bounded retry for calls that cross into an unreliable collaborator.
//!
//! A call moves through an explicit state machine:
//!
//! ```text
//! Attempting(1) ──ok──▶ Succeeded
//!      │ err (retryable)
//!      ▼
//! BackingOff(1, 1s) ──▶ Attempting(2) ──err──▶ BackingOff(2, 2s) ──▶ Attempting(3) ──err──▶ Exhausted
//! ```
//!
//! The delay after attempt `n` is `min(base * 2^(n-1), cap)` and depends on
//! nothing but `n`. There is never a delay after the final attempt. Errors the
//! caller marks as non-retryable leave the machine immediately, unchanged.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{NarrateError, RetryExhaustedError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 8_000;

/// Attempt budget and delay curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no waiting. Used by tests and local tooling.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after `attempt` (1-based) failed, or `None` when it was the last.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.attempts() {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(32);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Some(Duration::from_millis(delay_ms))
    }
}

/// Where a retried call currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffState {
    Attempting { attempt: u32 },
    BackingOff { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
    Succeeded { attempts: u32 },
}

impl BackoffState {
    /// Transition taken when `attempt` fails with a retryable error.
    pub fn after_failure(attempt: u32, policy: &RetryPolicy) -> Self {
        match policy.delay_after(attempt) {
            Some(delay) => Self::BackingOff { attempt, delay },
            None => Self::Exhausted { attempts: attempt },
        }
    }
}

/// A successful value and the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Why a retried call gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation returned an error the caller marked as not worth retrying.
    Aborted(E),
    /// Every attempt failed.
    Exhausted(RetryExhaustedError),
}

impl From<RetryError<NarrateError>> for NarrateError {
    fn from(err: RetryError<NarrateError>) -> Self {
        match err {
            RetryError::Aborted(e) => e,
            RetryError::Exhausted(e) => NarrateError::RetryExhausted(e),
        }
    }
}

/// The retry executor shared by every external call site.
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    policy: RetryPolicy,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Retry `op` on every error until it succeeds or the budget runs out.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        op: F,
    ) -> Result<Attempted<T>, RetryExhaustedError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        match self.run_if(label, op, |_| true).await {
            Ok(done) => Ok(done),
            Err(RetryError::Exhausted(e)) => Err(e),
            Err(RetryError::Aborted(e)) => Err(RetryExhaustedError {
                label: label.to_string(),
                attempts: 1,
                last_error: e.into(),
            }),
        }
    }

    /// Retry `op` while `retryable` approves of the error it returned.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        label: &str,
        mut op: F,
        retryable: P,
    ) -> Result<Attempted<T>, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
        P: Fn(&E) -> bool,
    {
        let mut state = BackoffState::Attempting { attempt: 1 };
        let mut last_error: Option<anyhow::Error> = None;

        loop {
            match state {
                BackoffState::Attempting { attempt } => match op(attempt).await {
                    Ok(value) => {
                        state = BackoffState::Succeeded { attempts: attempt };
                        debug!(label, ?state, "call succeeded");
                        return Ok(Attempted {
                            value,
                            attempts: attempt,
                        });
                    }
                    Err(e) if !retryable(&e) => {
                        debug!(label, attempt, "call failed with a non-retryable error");
                        return Err(RetryError::Aborted(e));
                    }
                    Err(e) => {
                        let e: anyhow::Error = e.into();
                        state = BackoffState::after_failure(attempt, &self.policy);
                        warn!(label, attempt, error = %format!("{:#}", e), ?state, "call attempt failed");
                        last_error = Some(e);
                    }
                },
                BackoffState::BackingOff { attempt, delay } => {
                    tokio::time::sleep(delay).await;
                    state = BackoffState::Attempting {
                        attempt: attempt + 1,
                    };
                }
                BackoffState::Exhausted { attempts } => {
                    return Err(RetryError::Exhausted(RetryExhaustedError {
                        label: label.to_string(),
                        attempts,
                        last_error: last_error
                            .unwrap_or_else(|| anyhow::anyhow!("no attempt was made")),
                    }));
                }
                BackoffState::Succeeded { .. } => unreachable!("success returns immediately"),
            }
        }
    }
}
