//! Error taxonomy for the planning pipeline.
//!
//! Validation problems are rejected before any upstream call; backend
//! and storage failures propagate to the HTTP boundary as distinct
//! kinds so the server can map them to status codes. Malformed
//! generation output is deliberately absent here: coercion is total
//! and degrades the plan instead of failing the request.

use std::time::Duration;

use thiserror::Error;

/// Main error type for the orchestrator core.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("{service} backend unavailable: {reason}")]
    UpstreamUnavailable { service: &'static str, reason: String },

    #[error("{service} backend timed out after {elapsed:?}")]
    UpstreamTimeout {
        service: &'static str,
        elapsed: Duration,
    },

    #[error("plan persistence failed: {0}")]
    Persistence(String),
}

impl OrchestratorError {
    /// Classify a reqwest failure against a named backend.
    pub fn from_reqwest(service: &'static str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OrchestratorError::UpstreamTimeout {
                service,
                elapsed: timeout,
            }
        } else {
            OrchestratorError::UpstreamUnavailable {
                service,
                reason: err.to_string(),
            }
        }
    }

    /// Whether a bounded retry is worthwhile (read-only calls only).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::UpstreamUnavailable { .. }
                | OrchestratorError::UpstreamTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
