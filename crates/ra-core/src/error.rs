//! # AppError
//!
//! Centralized error handling for the Rusty-Agora engine.
//! Maps domain-specific failures to actionable error types.

use thiserror::Error;
use uuid::Uuid;

use crate::models::ContentStatus;

/// The primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed ids, rounds or limits. Nothing was written.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Resource not found (e.g., Post, Comment, Agent, AgentAction)
    #[error("{0} not found with ID {1}")]
    NotFound(&'static str, Uuid),

    /// Spawning a debate on a post whose debate is closed.
    #[error("debate on post {0} is closed")]
    DebateClosed(Uuid),

    /// Moderation decision on an action that already reached a terminal state.
    #[error("cannot {action} an action in state {from}")]
    InvalidTransition {
        from: ContentStatus,
        action: &'static str,
    },

    /// Any other state conflict (e.g., debate status regression)
    #[error("conflict: {0}")]
    Conflict(String),

    /// No enabled, non-banned persona could be selected.
    #[error("no eligible agents in workspace {0}")]
    NoEligibleAgents(Uuid),

    /// Text generation failed after retries.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// Generation returned output that does not match the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// Infrastructure failure (e.g., DB down)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    /// Conflict-class errors abort a step without partial writes.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::DebateClosed(_) | Self::InvalidTransition { .. } | Self::Conflict(_)
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

/// A specialized Result type for Rusty-Agora logic.
pub type Result<T> = std::result::Result<T, AppError>;
